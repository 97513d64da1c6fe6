use crate::foundation::color::Color;
use crate::foundation::error::{ForgeError, ForgeResult};
use crate::schedule::{LineSchedule, ResolvedLine};
use crate::text::font::{TextLayoutEngine, Typeface};

/// Spacing between caption lines, as a multiple of the font size.
const LINE_SPACING: f32 = 1.25;

/// Captions occupy roughly this fraction of the usable image height.
const TYPE_HEIGHT_FRACTION: f64 = 0.15;

/// The shrink loop never goes below this point size.
const MIN_FONT_SIZE: i32 = 6;

/// Radius of the stamped outline disc, in pixels.
const OUTLINE_RADIUS: i32 = 6;

/// Recommended caption size in points for an image of the given height.
pub(crate) fn font_size_for_canvas(height: u32) -> i32 {
    ((f64::from(height) * 0.75) * TYPE_HEIGHT_FRACTION).round() as i32
}

fn one_for_zero(v: f64) -> f64 {
    if v == 0.0 { 1.0 } else { v }
}

/// Walk the font size down from `initial` until the text fits in at most two
/// wrapped lines or the minimum size is reached.
///
/// `line_count` reports how many lines the text wraps to at a candidate
/// size. Factored out of the drawing path so termination is checkable
/// without a rasterizer: the size strictly decreases toward the floor.
pub(crate) fn fit_font_size(
    initial: i32,
    mut line_count: impl FnMut(i32) -> ForgeResult<usize>,
) -> ForgeResult<i32> {
    let mut size = initial;
    while size > MIN_FONT_SIZE && line_count(size)? > 2 {
        size -= 1;
    }
    Ok(size)
}

/// Renders text overlays for one frame at a time.
///
/// Owns the per-worker rasterization state (parley contexts and a reusable
/// `vello_cpu` render context). The layout engine is created lazily on the
/// first non-empty line, so frames without visible text never require an
/// installed typeface.
pub(crate) struct OverlayRenderer {
    engine: Option<TextLayoutEngine>,
    ctx: Option<vello_cpu::RenderContext>,
}

impl OverlayRenderer {
    pub(crate) fn new() -> Self {
        Self {
            engine: None,
            ctx: None,
        }
    }

    /// Render every schedule visible at `frame` onto a fresh transparent
    /// surface. Returns `None` when nothing would be drawn.
    pub(crate) fn render_overlay(
        &mut self,
        schedules: &[LineSchedule],
        frame: u64,
        width: u32,
        height: u32,
    ) -> ForgeResult<Option<vello_cpu::Pixmap>> {
        let visible: Vec<ResolvedLine<'_>> = schedules
            .iter()
            .filter(|s| s.is_visible(frame))
            .map(|s| s.resolve(frame))
            .filter(|r| !r.line.text.trim().is_empty())
            .collect();
        if visible.is_empty() {
            return Ok(None);
        }

        let w: u16 = width
            .try_into()
            .map_err(|_| ForgeError::input(format!("image width {width} exceeds u16")))?;
        let h: u16 = height
            .try_into()
            .map_err(|_| ForgeError::input(format!("image height {height} exceeds u16")))?;

        if self.engine.is_none() {
            self.engine = Some(TextLayoutEngine::new(Typeface::installed()?)?);
        }
        let engine = self.engine.as_mut().expect("engine initialized above");

        let mut ctx = match self.ctx.take() {
            Some(ctx) if ctx.width() == w && ctx.height() == h => ctx,
            _ => vello_cpu::RenderContext::new(w, h),
        };
        ctx.reset();

        for resolved in &visible {
            draw_line(engine, &mut ctx, resolved, width, height)?;
        }

        let mut pixmap = vello_cpu::Pixmap::new(w, h);
        ctx.flush();
        ctx.render_to_pixmap(&mut pixmap);
        self.ctx = Some(ctx);
        Ok(Some(pixmap))
    }
}

/// Draw one resolved line: word-wrapped, shrunk to at most two lines,
/// outline-stamped in the stroke color, then filled.
fn draw_line(
    engine: &mut TextLayoutEngine,
    ctx: &mut vello_cpu::RenderContext,
    resolved: &ResolvedLine<'_>,
    width: u32,
    height: u32,
) -> ForgeResult<()> {
    let line = resolved.line;
    let text = line.text.trim();
    if text.is_empty() {
        return Ok(());
    }

    // Wrapping is governed by the first area's width; tween moves only the
    // anchor.
    let wrap_width = (one_for_zero(line.field[0].width) * f64::from(width)) as f32;

    let initial = font_size_for_canvas(height);
    let size = fit_font_size(initial, |pt| {
        let layout = engine.layout(text, pt as f32, LINE_SPACING, wrap_width)?;
        Ok(layout.lines().count())
    })?;
    let layout = engine.layout(text, size as f32, LINE_SPACING, wrap_width)?;

    // Center the wrapped block on the area anchor. Lines are middle-aligned
    // within the wrap width, so shifting by half of it centers each line's
    // glyphs on the anchor X.
    let block_h = f64::from(layout.height());
    let tx = resolved.area.x * f64::from(width) - f64::from(wrap_width) / 2.0;
    let ty = resolved.area.y * f64::from(height) - block_h / 2.0;

    // Outline pass: stamp the stroke color at every offset within a
    // radius-6 disc. The strict inequality leaves the corners rounded.
    let stroke = line.stroke_color;
    for dy in -OUTLINE_RADIUS..=OUTLINE_RADIUS {
        for dx in -OUTLINE_RADIUS..=OUTLINE_RADIUS {
            if dx * dx + dy * dy >= OUTLINE_RADIUS * OUTLINE_RADIUS {
                continue;
            }
            draw_layout_at(
                ctx,
                engine,
                &layout,
                stroke,
                tx + f64::from(dx),
                ty + f64::from(dy),
            );
        }
    }

    draw_layout_at(ctx, engine, &layout, line.color, tx, ty);
    Ok(())
}

fn draw_layout_at(
    ctx: &mut vello_cpu::RenderContext,
    engine: &TextLayoutEngine,
    layout: &parley::Layout<crate::text::font::GlyphBrush>,
    color: Color,
    tx: f64,
    ty: f64,
) {
    let [r, g, b] = color.to_rgb8();
    ctx.set_transform(vello_cpu::kurbo::Affine::translate((tx, ty)));
    for line in layout.lines() {
        for item in line.items() {
            let parley::layout::PositionedLayoutItem::GlyphRun(run) = item else {
                continue;
            };
            ctx.set_paint(vello_cpu::peniko::Color::from_rgba8(r, g, b, 255));
            let glyphs = run.glyphs().map(|gl| vello_cpu::Glyph {
                id: gl.id,
                x: gl.x,
                y: gl.y,
            });
            ctx.glyph_run(engine.font_data())
                .font_size(run.run().font_size())
                .fill_glyphs(glyphs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn font_size_scales_with_image_height() {
        // 0.75 * 0.15 = 0.1125 of the height, rounded.
        assert_eq!(font_size_for_canvas(400), 45);
        assert_eq!(font_size_for_canvas(100), 11);
    }

    #[test]
    fn one_for_zero_substitutes_full_width() {
        assert_eq!(one_for_zero(0.0), 1.0);
        assert_eq!(one_for_zero(0.4), 0.4);
    }

    #[test]
    fn fit_keeps_size_when_text_already_fits() {
        let size = fit_font_size(40, |_| Ok(2)).unwrap();
        assert_eq!(size, 40);
    }

    #[test]
    fn fit_shrinks_until_two_lines() {
        // Pretend the text needs 5 lines until the size dips below 30.
        let size = fit_font_size(40, |pt| Ok(if pt > 30 { 5 } else { 2 })).unwrap();
        assert_eq!(size, 30);
    }

    #[test]
    fn fit_stops_at_the_floor_for_unwrappable_text() {
        // A pathological measure that never fits must still terminate.
        let mut calls = 0u32;
        let size = fit_font_size(60, |_| {
            calls += 1;
            Ok(99)
        })
        .unwrap();
        assert_eq!(size, 6);
        assert!(calls <= 60);
    }

    #[test]
    fn fit_propagates_measurement_errors() {
        let err = fit_font_size(40, |_| {
            Err(crate::foundation::error::ForgeError::input("no typeface"))
        });
        assert!(err.is_err());
    }

    #[test]
    fn fit_leaves_tiny_initial_sizes_alone() {
        let size = fit_font_size(4, |_| Ok(10)).unwrap();
        assert_eq!(size, 4);
    }
}
