//! Histogram-based palette construction for GIF re-encoding.
//!
//! Colors are bucketed to a coarse step per channel, counted across every
//! frame, and the most frequent buckets win. Images that legitimately need
//! more than 256 colors are silently truncated to the top 256; that is the
//! service's long-standing behavior and downstream GIFs tolerate it.

use std::collections::HashMap;

/// Channel bucket width used when histogramming.
const BUCKET_STEP: u8 = 8;

/// GIF palettes hold at most this many entries, transparent slot included.
const MAX_COLORS: usize = 256;

/// Pixels with less alpha than this map to the transparent slot.
const ALPHA_CUTOFF: u8 = 128;

/// A single palette shared by every frame of a re-encoded GIF, so colors
/// stay consistent and do not flicker across frames.
#[derive(Clone, Debug)]
pub struct SharedPalette {
    colors: Vec<[u8; 3]>,
    transparent: Option<u8>,
}

fn bucket(v: u8) -> u8 {
    v - v % BUCKET_STEP
}

impl SharedPalette {
    /// Histogram `frames` (straight-alpha RGBA8) into a shared palette.
    pub fn build<'a>(frames: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut counts: HashMap<[u8; 3], u64> = HashMap::new();
        let mut any_transparent = false;

        for frame in frames {
            for px in frame.chunks_exact(4) {
                if px[3] < ALPHA_CUTOFF {
                    any_transparent = true;
                    continue;
                }
                let key = [bucket(px[0]), bucket(px[1]), bucket(px[2])];
                *counts.entry(key).or_insert(0) += 1;
            }
        }

        // Most frequent first; ties break on the color value so palette
        // order (and therefore encoded bytes) is deterministic.
        let mut ranked: Vec<([u8; 3], u64)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let budget = if any_transparent {
            MAX_COLORS - 1
        } else {
            MAX_COLORS
        };
        ranked.truncate(budget);

        let mut colors = Vec::with_capacity(ranked.len() + 1);
        let transparent = if any_transparent {
            colors.push([0, 0, 0]);
            Some(0)
        } else {
            None
        };
        colors.extend(ranked.into_iter().map(|(c, _)| c));
        if colors.is_empty() {
            colors.push([0, 0, 0]);
        }

        Self {
            colors,
            transparent,
        }
    }

    pub fn transparent_index(&self) -> Option<u8> {
        self.transparent
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Flat RGB bytes for the encoder, padded to a power-of-two entry count
    /// as the GIF color-table encoding requires.
    pub fn as_rgb_bytes(&self) -> Vec<u8> {
        let entries = self.colors.len().next_power_of_two().max(2);
        let mut out = Vec::with_capacity(entries * 3);
        for c in &self.colors {
            out.extend_from_slice(c);
        }
        out.resize(entries * 3, 0);
        out
    }

    /// Map one straight-alpha RGBA8 frame to palette indices.
    pub fn map_frame(&self, rgba: &[u8]) -> Vec<u8> {
        // GIF frames repeat few distinct colors, so memoize per frame.
        let mut memo: HashMap<[u8; 4], u8> = HashMap::new();
        let mut out = Vec::with_capacity(rgba.len() / 4);
        for px in rgba.chunks_exact(4) {
            let key = [px[0], px[1], px[2], px[3]];
            let idx = match memo.get(&key) {
                Some(&i) => i,
                None => {
                    let i = self.index_for(px);
                    memo.insert(key, i);
                    i
                }
            };
            out.push(idx);
        }
        out
    }

    fn index_for(&self, px: &[u8]) -> u8 {
        if px[3] < ALPHA_CUTOFF {
            if let Some(t) = self.transparent {
                return t;
            }
        }

        let mut best = 0usize;
        let mut best_dist = u32::MAX;
        for (i, c) in self.colors.iter().enumerate() {
            if Some(i as u8) == self.transparent {
                continue;
            }
            let dr = i32::from(px[0]) - i32::from(c[0]);
            let dg = i32::from(px[1]) - i32::from(c[1]);
            let db = i32::from(px[2]) - i32::from(c[2]);
            let dist = (dr * dr + dg * dg + db * db) as u32;
            if dist < best_dist {
                best_dist = dist;
                best = i;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(rgba: [u8; 4], px: usize) -> Vec<u8> {
        rgba.repeat(px)
    }

    #[test]
    fn palette_never_exceeds_256_entries() {
        // 4096 distinct buckets worth of pixels.
        let mut frame = Vec::new();
        for r in (0u16..256).step_by(16) {
            for g in (0u16..256).step_by(16) {
                for b in (0u16..256).step_by(16) {
                    frame.extend_from_slice(&[r as u8, g as u8, b as u8, 255]);
                }
            }
        }
        let pal = SharedPalette::build([frame.as_slice()]);
        assert!(pal.len() <= 256);
    }

    #[test]
    fn truncation_keeps_the_most_frequent_buckets() {
        let mut frame = solid([0, 0, 0, 255], 1000);
        frame.extend(solid([248, 0, 0, 255], 10));
        let pal = SharedPalette::build([frame.as_slice()]);

        // The dominant color must map exactly.
        let black = pal.map_frame(&[0, 0, 0, 255]);
        let red = pal.map_frame(&[248, 0, 0, 255]);
        assert_ne!(black[0], red[0]);
    }

    #[test]
    fn bucket_aligned_colors_round_trip_exactly() {
        let frame = solid([64, 128, 200, 255], 16);
        let pal = SharedPalette::build([frame.as_slice()]);
        let idx = pal.map_frame(&frame)[0] as usize;
        assert_eq!(pal.colors[idx], [64, 128, 200]);
    }

    #[test]
    fn transparency_reserves_a_slot() {
        let mut frame = solid([10, 10, 10, 255], 4);
        frame.extend_from_slice(&[0, 0, 0, 0]);
        let pal = SharedPalette::build([frame.as_slice()]);
        assert_eq!(pal.transparent_index(), Some(0));

        let mapped = pal.map_frame(&frame);
        assert_eq!(mapped[4], 0);
        assert_ne!(mapped[0], 0);
    }

    #[test]
    fn opaque_gifs_have_no_transparent_slot() {
        let frame = solid([10, 10, 10, 255], 4);
        let pal = SharedPalette::build([frame.as_slice()]);
        assert_eq!(pal.transparent_index(), None);
    }

    #[test]
    fn rgb_bytes_are_power_of_two_padded() {
        let mut frame = solid([8, 8, 8, 255], 4);
        frame.extend(solid([16, 16, 16, 255], 4));
        frame.extend(solid([24, 24, 24, 255], 4));
        let pal = SharedPalette::build([frame.as_slice()]);
        assert_eq!(pal.len(), 3);
        assert_eq!(pal.as_rgb_bytes().len(), 4 * 3);
    }

    #[test]
    fn palette_order_is_deterministic() {
        let mut frame = Vec::new();
        for v in (0u16..256).step_by(8) {
            frame.extend(solid([v as u8, 0, 0, 255], 3));
        }
        let a = SharedPalette::build([frame.as_slice()]);
        let b = SharedPalette::build([frame.as_slice()]);
        assert_eq!(a.colors, b.colors);
    }
}
