use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::foundation::error::{ForgeError, ForgeResult};

/// RGBA8 brush carried through parley layout styles.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct GlyphBrush;

static TYPEFACE: OnceLock<Arc<Typeface>> = OnceLock::new();

/// The one typeface every caption is set in.
///
/// The raw font bytes are installed once during process initialization and
/// shared read-only afterwards; render workers each build their own parley
/// contexts over the shared bytes (layout state is per-thread, the bytes are
/// not). After [`Typeface::install`] succeeds the value never changes.
#[derive(Debug)]
pub struct Typeface {
    bytes: Vec<u8>,
    family: String,
}

impl Typeface {
    /// Parse and validate font bytes without installing them globally.
    pub fn from_bytes(bytes: Vec<u8>) -> ForgeResult<Arc<Self>> {
        // Probe registration up front so a bad font fails at startup, not
        // mid-render.
        let mut probe = parley::FontContext::default();
        let family = register(&mut probe, &bytes)?;
        Ok(Arc::new(Self { bytes, family }))
    }

    pub fn from_file(path: &Path) -> ForgeResult<Arc<Self>> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    /// Install `face` as the process-wide typeface. Fails if one is already
    /// installed.
    pub fn install(face: Arc<Self>) -> ForgeResult<()> {
        TYPEFACE
            .set(face)
            .map_err(|_| ForgeError::input("a typeface is already installed"))
    }

    /// The installed typeface, or an input error when none has been
    /// installed yet. Overlays whose trimmed text is empty never get here.
    pub fn installed() -> ForgeResult<Arc<Self>> {
        TYPEFACE
            .get()
            .cloned()
            .ok_or_else(|| ForgeError::input("no typeface installed"))
    }

    pub fn family(&self) -> &str {
        &self.family
    }
}

fn register(font_ctx: &mut parley::FontContext, bytes: &[u8]) -> ForgeResult<String> {
    let families = font_ctx
        .collection
        .register_fonts(parley::fontique::Blob::from(bytes.to_vec()), None);
    let family_id = families
        .first()
        .map(|(id, _)| *id)
        .ok_or_else(|| ForgeError::input("no font families registered from font bytes"))?;
    let family = font_ctx
        .collection
        .family_name(family_id)
        .ok_or_else(|| ForgeError::input("registered font family has no name"))?
        .to_string();
    Ok(family)
}

/// Per-worker text layout state over the shared typeface.
pub(crate) struct TextLayoutEngine {
    family: String,
    font_ctx: parley::FontContext,
    layout_ctx: parley::LayoutContext<GlyphBrush>,
    font_data: vello_cpu::peniko::FontData,
}

impl TextLayoutEngine {
    pub(crate) fn new(face: Arc<Typeface>) -> ForgeResult<Self> {
        let mut font_ctx = parley::FontContext::default();
        let family = register(&mut font_ctx, &face.bytes)?;
        let font_data = vello_cpu::peniko::FontData::new(
            vello_cpu::peniko::Blob::from(face.bytes.clone()),
            0,
        );
        Ok(Self {
            family,
            font_ctx,
            layout_ctx: parley::LayoutContext::new(),
            font_data,
        })
    }

    pub(crate) fn font_data(&self) -> &vello_cpu::peniko::FontData {
        &self.font_data
    }

    /// Shape and wrap `text` at `size_pt`, breaking lines at `max_width_px`
    /// and centering each line within it.
    pub(crate) fn layout(
        &mut self,
        text: &str,
        size_pt: f32,
        line_height: f32,
        max_width_px: f32,
    ) -> ForgeResult<parley::Layout<GlyphBrush>> {
        if !size_pt.is_finite() || size_pt <= 0.0 {
            return Err(ForgeError::input("text size must be finite and > 0"));
        }

        let mut builder = self
            .layout_ctx
            .ranged_builder(&mut self.font_ctx, text, 1.0, true);
        builder.push_default(parley::style::StyleProperty::FontStack(
            parley::style::FontStack::Source(std::borrow::Cow::Owned(self.family.clone())),
        ));
        builder.push_default(parley::style::StyleProperty::FontSize(size_pt));
        builder.push_default(parley::style::StyleProperty::LineHeight(
            parley::style::LineHeight::FontSizeRelative(line_height),
        ));
        builder.push_default(parley::style::StyleProperty::Brush(GlyphBrush));

        let mut layout: parley::Layout<GlyphBrush> = builder.build(text);
        layout.break_all_lines(Some(max_width_px));
        layout.align(
            Some(max_width_px),
            parley::Alignment::Center,
            parley::AlignmentOptions::default(),
        );
        Ok(layout)
    }
}
