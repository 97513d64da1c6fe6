use image::RgbaImage;

use crate::foundation::error::{ForgeError, ForgeResult};
use crate::model::Macro;
use crate::render::composite::{
    over_in_place, premultiply_rgba8_in_place, unpremultiply_rgba8_in_place,
};
use crate::schedule::LineSchedule;
use crate::text::compose::OverlayRenderer;

/// Render a macro's overlay onto a single-frame template.
///
/// The overlay is drawn onto a transparent surface sized to the template and
/// flattened over the template pixels with source-over blending. Given
/// identical inputs the output bytes are identical; the generation cache
/// depends on that.
pub fn render_still(template: &RgbaImage, m: &Macro) -> ForgeResult<RgbaImage> {
    if m.text_overlay.is_empty() {
        return Err(ForgeError::input("macro has no overlay"));
    }

    let (width, height) = template.dimensions();
    let schedules = m
        .text_overlay
        .iter()
        .map(|line| LineSchedule::new(1, line.clone()))
        .collect::<ForgeResult<Vec<_>>>()?;

    let mut base = template.as_raw().clone();
    premultiply_rgba8_in_place(&mut base);

    let mut painter = OverlayRenderer::new();
    if let Some(overlay) = painter.render_overlay(&schedules, 0, width, height)? {
        over_in_place(&mut base, overlay.data_as_u8_slice())?;
    }

    unpremultiply_rgba8_in_place(&mut base);
    RgbaImage::from_raw(width, height, base)
        .ok_or_else(|| ForgeError::encode("rendered buffer does not match template dimensions"))
}
