//! Memeforge renders image macros: stylized text overlaid on still or
//! animated templates, served from a disk-backed generation cache.
//!
//! The crate has three layers:
//!
//! - Layout and timing: [`LineSchedule`] decides which placement area a
//!   text line uses at each animation frame (with optional tweening) and
//!   when the line is visible.
//! - Rendering: [`render_still`] composites overlays onto a single-frame
//!   template; [`render_animated`] does the same across every frame of a
//!   GIF, honoring disposal methods and re-encoding against one shared
//!   palette.
//! - Serving: [`MacroCache::fetch_or_generate`] maps a macro to a cached
//!   file plus a content-hash ETag, deduplicating concurrent generations;
//!   a background janitor evicts stale entries once the cache grows large.
#![forbid(unsafe_code)]

pub mod cache;
pub mod foundation;
pub mod model;
pub mod render;
pub mod schedule;
pub mod text;

pub use cache::etags::EtagMap;
pub use cache::generate::{CacheOptions, CacheStats, MacroCache, Served};
pub use cache::janitor::JanitorHandle;
pub use foundation::color::Color;
pub use foundation::error::{ForgeError, ForgeResult};
pub use model::{Area, Areas, Macro, Template, TextLine, canonical_template_name,
    macro_from_overlay};
pub use render::gif::render_animated;
pub use render::still::render_still;
pub use schedule::{LineSchedule, ResolvedLine};
pub use text::font::Typeface;
