use crate::foundation::error::{ForgeError, ForgeResult};
use crate::model::{Area, TextLine};

/// Per-line frame schedule for a template with a known frame count.
///
/// A schedule answers two questions about a [`TextLine`]: whether the line
/// is visible at a frame index, and which of its areas (possibly
/// interpolated) is active there. Areas are assigned cyclically to equal
/// bands of `ceil(total / areas)` frames.
#[derive(Clone, Debug)]
pub struct LineSchedule {
    line: TextLine,
    frames_per_area: u64,
    start: u64,
    end: u64,
}

/// A single-frame view of a line: the line plus the one effective area for
/// that frame. Ephemeral; never persisted.
#[derive(Clone, Copy, Debug)]
pub struct ResolvedLine<'a> {
    pub line: &'a TextLine,
    pub area: Area,
}

impl LineSchedule {
    /// Build the schedule for `line` across `total_frames` frames.
    ///
    /// The visibility window is `[ceil(start·total), end]` where `end` is
    /// the last frame unless the line's `end` fraction exceeds its `start`.
    pub fn new(total_frames: u64, line: TextLine) -> ForgeResult<Self> {
        if line.field.is_empty() {
            return Err(ForgeError::input("text line has no areas"));
        }
        if total_frames == 0 {
            return Err(ForgeError::input("schedule needs at least one frame"));
        }

        let areas = line.field.len() as u64;
        let frames_per_area = total_frames.div_ceil(areas);

        let mut start = 0;
        let mut end = total_frames;
        if line.start > 0.0 {
            start = (line.start * total_frames as f64).ceil() as u64;
        }
        if line.end > line.start {
            end = (line.end * total_frames as f64).ceil() as u64;
        }

        Ok(Self {
            line,
            frames_per_area,
            start,
            end,
        })
    }

    /// Whether the line is visible at frame index `i`.
    pub fn is_visible(&self, i: u64) -> bool {
        self.start <= i && i <= self.end
    }

    pub fn line(&self) -> &TextLine {
        &self.line
    }

    /// Resolve the effective area at frame index `i`.
    pub fn resolve(&self, i: u64) -> ResolvedLine<'_> {
        let field = &self.line.field;
        if field.len() == 1 {
            return ResolvedLine {
                line: &self.line,
                area: field[0],
            };
        }

        let n = field.len() as u64;
        let fpa = self.frames_per_area;
        let pos = (i / fpa) % n;
        let mut area = field[pos as usize];

        let rem = i % fpa;
        if area.tween && rem != 0 {
            // Interpolate toward the next area in cyclic order, not merely
            // the next frame.
            let npos = ((i + fpa) / fpa) % n;
            let next = field[npos as usize];

            let dx = (next.x - area.x) / fpa as f64;
            let dy = (next.y - area.y) / fpa as f64;
            area.x += rem as f64 * dx;
            area.y += rem as f64 * dy;
        }

        ResolvedLine {
            line: &self.line,
            area,
        }
    }
}
