//! The in-process ETag index: cache path → quoted SHA-256 content hash.
//!
//! Read/write contract: any thread may read at any time; entries are written
//! only after a successful generation (or an explicit rehash of an existing
//! file), and removed when their file is deleted. The index is never
//! persisted; a fresh process rebuilds entries by rehashing cache files as
//! they are first served.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use crate::foundation::error::ForgeResult;

#[derive(Default)]
pub struct EtagMap {
    inner: RwLock<HashMap<PathBuf, String>>,
}

impl EtagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<String> {
        self.inner.read().get(path).cloned()
    }

    pub fn insert(&self, path: PathBuf, etag: String) {
        self.inner.write().insert(path, etag);
    }

    pub fn remove(&self, path: &Path) {
        self.inner.write().remove(path);
    }

    /// Hash an existing cache file and record its ETag.
    pub fn rehash_file(&self, path: &Path) -> ForgeResult<String> {
        let etag = hash_file(path)?;
        self.insert(path.to_path_buf(), etag.clone());
        Ok(etag)
    }
}

/// Format a digest the way it is sent in an `ETag` header: quoted hex.
pub fn format_etag(digest: &[u8]) -> String {
    let mut out = String::with_capacity(digest.len() * 2 + 2);
    out.push('"');
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out.push('"');
    out
}

/// Stream a file through SHA-256 and return its quoted-hex ETag.
pub fn hash_file(path: &Path) -> ForgeResult<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format_etag(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etags_are_quoted_hex() {
        let tag = format_etag(&[0xab, 0x01]);
        assert_eq!(tag, "\"ab01\"");
    }

    #[test]
    fn map_insert_get_remove() {
        let map = EtagMap::new();
        let p = PathBuf::from("/cache/0000-1.png");
        assert_eq!(map.get(&p), None);

        map.insert(p.clone(), "\"aa\"".to_string());
        assert_eq!(map.get(&p).as_deref(), Some("\"aa\""));

        map.remove(&p);
        assert_eq!(map.get(&p), None);
    }

    #[test]
    fn rehash_matches_direct_hash() {
        let dir = std::env::temp_dir().join(format!(
            "memeforge_etag_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("f.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let map = EtagMap::new();
        let tag = map.rehash_file(&path).unwrap();
        assert_eq!(tag, hash_file(&path).unwrap());
        assert_eq!(map.get(&path), Some(tag.clone()));
        // SHA-256 of "hello world", quoted.
        assert!(tag.starts_with("\"b94d27b9934d3e08"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
