//! The animated-template pipeline: decode every frame of a GIF, rebuild
//! each frame's backdrop according to its predecessor's disposal method,
//! composite the text overlay per frame in parallel, and re-encode the
//! result against one shared palette.

use std::io::{Read, Write};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::foundation::error::{ForgeError, ForgeResult};
use crate::model::Macro;
use crate::render::composite::{
    over_in_place, over_in_place_at, premultiply_rgba8_in_place, unpremultiply_rgba8_in_place,
};
use crate::render::quantize::SharedPalette;
use crate::schedule::LineSchedule;
use crate::text::compose::OverlayRenderer;

/// One decoded source frame, pixels premultiplied, rect already normalized
/// against the union bounds.
struct SourceFrame {
    rgba: Vec<u8>,
    left: u32,
    top: u32,
    width: u32,
    height: u32,
    dispose: gif::DisposalMethod,
    delay: u16,
}

struct DecodedGif {
    width: u32,
    height: u32,
    frames: Vec<SourceFrame>,
    /// Premultiplied background color from the logical screen descriptor;
    /// fully transparent when the GIF declares none.
    background: [u8; 4],
}

fn decode_gif(reader: impl Read) -> ForgeResult<DecodedGif> {
    let mut opts = gif::DecodeOptions::new();
    opts.set_color_output(gif::ColorOutput::RGBA);
    let mut decoder = opts
        .read_info(reader)
        .map_err(|e| ForgeError::decode(format!("read gif header: {e}")))?;

    let background = match (decoder.global_palette(), decoder.bg_color()) {
        (Some(palette), Some(idx)) if (idx + 1) * 3 <= palette.len() => [
            palette[idx * 3],
            palette[idx * 3 + 1],
            palette[idx * 3 + 2],
            255,
        ],
        _ => [0, 0, 0, 0],
    };

    let mut frames = Vec::new();
    loop {
        let frame = match decoder.read_next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => return Err(ForgeError::decode(format!("read gif frame: {e}"))),
        };
        let mut rgba = frame.buffer.to_vec();
        premultiply_rgba8_in_place(&mut rgba);
        frames.push(SourceFrame {
            rgba,
            left: u32::from(frame.left),
            top: u32::from(frame.top),
            width: u32::from(frame.width),
            height: u32::from(frame.height),
            dispose: frame.dispose,
            delay: frame.delay,
        });
    }

    if frames.is_empty() {
        return Err(ForgeError::input("no frames in GIF"));
    }

    // Frames may sit at varying offsets inside the nominal canvas; the
    // output canvas is the union of their rects, normalized to (0, 0).
    let min_x = frames.iter().map(|f| f.left).min().unwrap_or(0);
    let min_y = frames.iter().map(|f| f.top).min().unwrap_or(0);
    let max_x = frames.iter().map(|f| f.left + f.width).max().unwrap_or(0);
    let max_y = frames.iter().map(|f| f.top + f.height).max().unwrap_or(0);
    for f in &mut frames {
        f.left -= min_x;
        f.top -= min_y;
    }

    Ok(DecodedGif {
        width: max_x - min_x,
        height: max_y - min_y,
        frames,
        background,
    })
}

/// A chain of single-use completion slots, one per frame boundary.
///
/// Slot `i` carries frame `i`'s backdrop and is filled by frame `i-1`'s
/// worker (slot 0 is seeded before rendering starts). The chain is
/// independent of how frames are scheduled onto workers; it is the
/// pipeline's only cross-frame ordering edge. A failure travels forward
/// through the chain so no downstream waiter blocks on a slot that will
/// never be filled.
struct BackdropChain {
    slots: Vec<Slot>,
}

struct Slot {
    state: Mutex<Option<Result<Arc<Vec<u8>>, Arc<ForgeError>>>>,
    ready: Condvar,
}

impl BackdropChain {
    fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        for _ in 0..len {
            slots.push(Slot {
                state: Mutex::new(None),
                ready: Condvar::new(),
            });
        }
        Self { slots }
    }

    fn fulfill(&self, i: usize, backdrop: Arc<Vec<u8>>) {
        self.put(i, Ok(backdrop));
    }

    fn poison(&self, i: usize, err: Arc<ForgeError>) {
        self.put(i, Err(err));
    }

    fn put(&self, i: usize, value: Result<Arc<Vec<u8>>, Arc<ForgeError>>) {
        let slot = &self.slots[i];
        let mut state = slot.state.lock();
        // First write wins; a slot is single-use.
        if state.is_none() {
            *state = Some(value);
            slot.ready.notify_all();
        }
    }

    fn wait(&self, i: usize) -> Result<Arc<Vec<u8>>, Arc<ForgeError>> {
        let slot = &self.slots[i];
        let mut state = slot.state.lock();
        while state.is_none() {
            slot.ready.wait(&mut state);
        }
        state.as_ref().expect("slot filled").clone()
    }
}

/// Render `m`'s overlay onto the animated template read from `reader` and
/// encode the finished GIF into `out`.
///
/// Per-frame rendering fans out over a worker pool sized to the available
/// CPUs; frame `i`'s backdrop is guaranteed resolved before frame `i`'s
/// composition begins via the [`BackdropChain`]. Any frame's failure aborts
/// the whole render.
pub fn render_animated(reader: impl Read, m: &Macro, out: impl Write) -> ForgeResult<()> {
    if m.text_overlay.is_empty() {
        return Err(ForgeError::input("macro has no overlay"));
    }

    let decoded = decode_gif(reader)?;
    let start = Instant::now();
    let frame_count = decoded.frames.len();

    let schedules = m
        .text_overlay
        .iter()
        .map(|line| LineSchedule::new(frame_count as u64, line.clone()))
        .collect::<ForgeResult<Vec<_>>>()?;

    let rendered = render_frames(&decoded, &schedules)?;
    info!(
        frames = frame_count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "rendered animated macro"
    );

    encode_frames(&decoded, rendered, out)
}

/// Phase 3: reconstruct backdrops and composite every frame, in parallel.
/// Returns straight-alpha RGBA canvases in frame order.
fn render_frames(decoded: &DecodedGif, schedules: &[LineSchedule]) -> ForgeResult<Vec<Vec<u8>>> {
    let n = decoded.frames.len();
    let (width, height) = (decoded.width, decoded.height);
    let canvas_len = (width as usize) * (height as usize) * 4;

    let bg_canvas: Arc<Vec<u8>> = Arc::new(decoded.background.repeat(canvas_len / 4));
    let chain = BackdropChain::new(n);
    chain.fulfill(0, bg_canvas.clone());

    let results: Vec<OnceLock<Vec<u8>>> = (0..n).map(|_| OnceLock::new()).collect();
    let first_error: Mutex<Option<ForgeError>> = Mutex::new(None);

    let workers = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1)
        .min(n);

    std::thread::scope(|scope| {
        for w in 0..workers {
            let chain = &chain;
            let results = &results;
            let first_error = &first_error;
            let bg_canvas = &bg_canvas;
            scope.spawn(move || {
                let mut painter = OverlayRenderer::new();
                for i in (w..n).step_by(workers) {
                    match render_one(decoded, schedules, chain, bg_canvas, &mut painter, i) {
                        Ok(canvas) => {
                            let _ = results[i].set(canvas);
                        }
                        Err(e) => {
                            let mut slot = first_error.lock();
                            if slot.is_none() {
                                *slot = Some(ForgeError::Shared(e));
                            }
                        }
                    }
                }
            });
        }
    });

    if let Some(err) = first_error.into_inner() {
        return Err(err);
    }
    results
        .into_iter()
        .map(|cell| {
            cell.into_inner()
                .ok_or_else(|| ForgeError::encode("frame missing after parallel render"))
        })
        .collect()
}

fn render_one(
    decoded: &DecodedGif,
    schedules: &[LineSchedule],
    chain: &BackdropChain,
    bg_canvas: &Arc<Vec<u8>>,
    painter: &mut OverlayRenderer,
    i: usize,
) -> Result<Vec<u8>, Arc<ForgeError>> {
    let n = decoded.frames.len();
    let frame = &decoded.frames[i];

    // Block until this frame's backdrop is painted.
    let backdrop = match chain.wait(i) {
        Ok(b) => b,
        Err(e) => {
            if i + 1 < n {
                chain.poison(i + 1, e.clone());
            }
            return Err(e);
        }
    };

    let mut canvas = (*backdrop).clone();
    if let Err(e) = over_in_place_at(
        &mut canvas,
        decoded.width,
        decoded.height,
        &frame.rgba,
        frame.width,
        frame.height,
        frame.left,
        frame.top,
    ) {
        let shared = Arc::new(e);
        if i + 1 < n {
            chain.poison(i + 1, shared.clone());
        }
        return Err(shared);
    }

    // Hand the next frame its backdrop before the (slow) text pass. The
    // backdrop never includes overlay text.
    if i + 1 < n {
        match frame.dispose {
            gif::DisposalMethod::Background => chain.fulfill(i + 1, bg_canvas.clone()),
            gif::DisposalMethod::Previous => chain.fulfill(i + 1, backdrop.clone()),
            gif::DisposalMethod::Keep | gif::DisposalMethod::Any => {
                chain.fulfill(i + 1, Arc::new(canvas.clone()))
            }
        }
    }

    let overlay = painter
        .render_overlay(schedules, i as u64, decoded.width, decoded.height)
        .map_err(Arc::new)?;
    if let Some(pixmap) = overlay {
        over_in_place(&mut canvas, pixmap.data_as_u8_slice()).map_err(Arc::new)?;
    }

    unpremultiply_rgba8_in_place(&mut canvas);
    Ok(canvas)
}

/// Phase 5: one shared palette across every frame, then parallel index
/// mapping and sequential encoding.
fn encode_frames(
    decoded: &DecodedGif,
    rendered: Vec<Vec<u8>>,
    out: impl Write,
) -> ForgeResult<()> {
    let width: u16 = decoded
        .width
        .try_into()
        .map_err(|_| ForgeError::encode("gif canvas width exceeds u16"))?;
    let height: u16 = decoded
        .height
        .try_into()
        .map_err(|_| ForgeError::encode("gif canvas height exceeds u16"))?;

    let palette = SharedPalette::build(rendered.iter().map(|f| f.as_slice()));
    debug!(colors = palette.len(), "built shared palette");

    let indexed: Vec<Vec<u8>> = rendered
        .par_iter()
        .map(|frame| palette.map_frame(frame))
        .collect();

    let mut encoder = gif::Encoder::new(out, width, height, &palette.as_rgb_bytes())
        .map_err(|e| ForgeError::encode(format!("write gif header: {e}")))?;
    encoder
        .set_repeat(gif::Repeat::Infinite)
        .map_err(|e| ForgeError::encode(format!("write gif loop extension: {e}")))?;

    for (src, buffer) in decoded.frames.iter().zip(indexed) {
        let frame = gif::Frame {
            width,
            height,
            delay: src.delay,
            transparent: palette.transparent_index(),
            buffer: std::borrow::Cow::Owned(buffer),
            ..gif::Frame::default()
        };
        encoder
            .write_frame(&frame)
            .map_err(|e| ForgeError::encode(format!("write gif frame: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn chain_delivers_in_any_wait_order() {
        let chain = Arc::new(BackdropChain::new(3));
        let c2 = chain.clone();
        let waiter = thread::spawn(move || c2.wait(2).unwrap());

        chain.fulfill(2, Arc::new(vec![7u8]));
        assert_eq!(*waiter.join().unwrap(), vec![7u8]);
    }

    #[test]
    fn chain_first_write_wins() {
        let chain = BackdropChain::new(1);
        chain.fulfill(0, Arc::new(vec![1u8]));
        chain.poison(0, Arc::new(ForgeError::input("late")));
        assert_eq!(*chain.wait(0).unwrap(), vec![1u8]);
    }

    #[test]
    fn chain_poison_reaches_waiters() {
        let chain = Arc::new(BackdropChain::new(2));
        let c2 = chain.clone();
        let waiter = thread::spawn(move || c2.wait(1));

        chain.poison(1, Arc::new(ForgeError::input("frame 0 failed")));
        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.to_string().contains("frame 0 failed"));
    }

    #[test]
    fn empty_gif_is_an_input_error() {
        // A GIF with a header and trailer but no image descriptors.
        let mut bytes = Vec::new();
        {
            let palette = [0u8, 0, 0, 255, 255, 255];
            let _encoder = gif::Encoder::new(&mut bytes, 4, 4, &palette).unwrap();
        }
        let m = crate::model::macro_from_overlay(1, 1, vec![test_line(" ")]);
        let err = render_animated(bytes.as_slice(), &m, Vec::new()).unwrap_err();
        assert!(err.to_string().contains("no frames"));
    }

    fn test_line(text: &str) -> crate::model::TextLine {
        crate::model::TextLine {
            text: text.to_string(),
            color: crate::foundation::color::Color::rgb(1.0, 1.0, 1.0),
            stroke_color: crate::foundation::color::Color::rgb(0.0, 0.0, 0.0),
            field: crate::model::Areas(vec![crate::model::Area {
                x: 0.5,
                y: 0.5,
                width: 0.0,
                tween: false,
            }]),
            start: 0.0,
            end: 0.0,
        }
    }
}
