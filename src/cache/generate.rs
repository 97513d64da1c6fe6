use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::cache::etags::{EtagMap, format_etag, hash_file};
use crate::cache::flight::Flights;
use crate::foundation::error::{ForgeError, ForgeResult};
use crate::model::{Macro, Template};
use crate::render::gif::render_animated;
use crate::render::still::render_still;

/// Tunables for the generation cache and its janitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Base string mixed into cache file names. Changing it invalidates
    /// every cached entry. Empty means the default seed.
    pub seed: String,

    /// Do not prune the cache until it is at least this big.
    pub min_prune_bytes: u64,

    /// When pruning, discard entries not accessed in at least this long.
    pub max_access_age: Duration,

    /// How often the janitor scans the cache directory.
    pub poll_interval: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            seed: String::new(),
            min_prune_bytes: 50 << 20,
            max_access_age: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Counters mirrored from the serving path; see [`MacroCache::stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub reused: u64,
    pub generated: u64,
}

/// What a caller needs to serve a macro over HTTP: the cached file and its
/// validation tag.
#[derive(Clone, Debug)]
pub struct Served {
    pub path: PathBuf,
    pub etag: String,
}

/// State shared between the serving path and the janitor: the cache
/// directory, the ETag index, and the single metadata lock that serializes
/// "record a generated entry" against "evict candidate files".
pub(crate) struct CacheShared {
    pub(crate) dir: PathBuf,
    pub(crate) etags: EtagMap,
    pub(crate) meta_lock: Mutex<()>,
}

/// The disk-backed macro generation cache.
///
/// Safe for concurrent use from any number of request threads. Rendering the
/// same macro is idempotent, so a cache entry is only ever replaced by an
/// identical one.
pub struct MacroCache {
    shared: Arc<CacheShared>,
    options: CacheOptions,
    flights: Flights<PathBuf, String>,

    hits: AtomicU64,
    misses: AtomicU64,
    reused: AtomicU64,
    generated: AtomicU64,
}

impl MacroCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, options: CacheOptions) -> ForgeResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            shared: Arc::new(CacheShared {
                dir,
                etags: EtagMap::new(),
                meta_lock: Mutex::new(()),
            }),
            options,
            flights: Flights::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            generated: AtomicU64::new(0),
        })
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// The deterministic cache file path for `m`, whether or not the file
    /// exists yet.
    pub fn cache_path(&self, m: &Macro, t: &Template) -> PathBuf {
        let seed = if self.options.seed.is_empty() {
            "0000"
        } else {
            self.options.seed.as_str()
        };
        self.shared
            .dir
            .join(format!("{seed}-{}{}", m.id, t.extension()))
    }

    /// Serve `m` from the cache, generating it first if needed.
    ///
    /// The hit path never invokes the renderer. Concurrent misses for the
    /// same entry are deduplicated: one caller renders, the rest share its
    /// result (or its error).
    pub fn fetch_or_generate(&self, m: &Macro, t: &Template) -> ForgeResult<Served> {
        let path = self.cache_path(m, t);

        if path.is_file() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            let etag = match self.shared.etags.get(&path) {
                Some(etag) => etag,
                None => {
                    // Fresh process serving an entry generated by an earlier
                    // one; rebuild the index entry from the file contents.
                    let etag = hash_file(&path)?;
                    let _guard = self.shared.meta_lock.lock();
                    self.shared.etags.insert(path.clone(), etag.clone());
                    etag
                }
            };
            debug!(path = %path.display(), "macro cache hit");
            return Ok(Served { path, etag });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(path = %path.display(), macro_id = m.id, "cache file not found, generating");

        let (result, reused) = self
            .flights
            .run(path.clone(), || self.generate(m, t, &path));
        if reused {
            self.reused.fetch_add(1, Ordering::Relaxed);
        }
        result.map(|etag| Served { path, etag })
    }

    /// Drop `m`'s cache entry (its macro was deleted upstream). Missing
    /// files are fine; the entry may never have been generated.
    pub fn remove(&self, m: &Macro, t: &Template) -> ForgeResult<()> {
        let path = self.cache_path(m, t);
        let _guard = self.shared.meta_lock.lock();
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed macro cache entry"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.shared.etags.remove(&path);
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<CacheShared> {
        &self.shared
    }

    /// Render `m` and stream the encoded bytes into `path`, hashing as they
    /// are written. Returns the entry's ETag.
    fn generate(&self, m: &Macro, t: &Template, path: &Path) -> ForgeResult<String> {
        let ext = t.extension();
        match ext.as_str() {
            ".gif" | ".jpg" | ".jpeg" | ".png" => {}
            other => return Err(ForgeError::input(format!("unknown extension: {other:?}"))),
        }

        let src = File::open(&t.path)?;
        self.generated.fetch_add(1, Ordering::Relaxed);

        let dst = File::create(path)?;
        let mut tee = HashingWriter::new(BufWriter::new(dst));

        let rendered = self.encode_into(&mut tee, src, m, &ext);
        let etag = rendered.and_then(|()| {
            tee.flush()?;
            Ok(format_etag(&tee.finalize()))
        });

        match etag {
            Ok(etag) => {
                let _guard = self.shared.meta_lock.lock();
                self.shared.etags.insert(path.to_path_buf(), etag.clone());
                Ok(etag)
            }
            Err(e) => {
                // Leave no truncated entry behind; the next request sees a
                // clean miss.
                std::fs::remove_file(path).ok();
                Err(e)
            }
        }
    }

    fn encode_into(
        &self,
        out: &mut impl Write,
        src: File,
        m: &Macro,
        ext: &str,
    ) -> ForgeResult<()> {
        if ext == ".gif" {
            return render_animated(BufReader::new(src), m, out);
        }

        let template = image::ImageReader::new(BufReader::new(src))
            .with_guessed_format()?
            .decode()
            .map_err(|e| ForgeError::decode(format!("decode template image: {e}")))?
            .to_rgba8();
        let rendered = render_still(&template, m)?;

        match ext {
            ".jpg" | ".jpeg" => {
                let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(out, 90);
                image::DynamicImage::ImageRgba8(rendered)
                    .to_rgb8()
                    .write_with_encoder(encoder)
                    .map_err(|e| ForgeError::encode(format!("encode jpeg: {e}")))
            }
            ".png" => {
                let encoder = image::codecs::png::PngEncoder::new(out);
                rendered
                    .write_with_encoder(encoder)
                    .map_err(|e| ForgeError::encode(format!("encode png: {e}")))
            }
            other => Err(ForgeError::input(format!("unknown extension: {other:?}"))),
        }
    }
}

/// A writer that feeds everything it writes through SHA-256 on the way to
/// the destination, so the content hash costs no second pass.
struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finalize(self) -> [u8; 32] {
        self.hasher.finalize().into()
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
