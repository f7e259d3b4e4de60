//! Size-capped on-disk response cache.
//!
//! Entries are opaque files keyed by the SHA-256 of the canonical request
//! URL, sharded by the first two hex characters to keep directories small.
//! Each entry is a serialized response envelope, gzip-compressed when
//! compression is enabled. Writes are atomic (temp file + rename), so
//! concurrent readers never observe a torn entry. The total on-disk size is
//! capped; eviction removes the oldest entries first.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::CacheOptions;
use crate::error::{Error, Result};

/// A stored HTTP response: status, headers, body, and the storage timestamp
/// used for freshness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at_secs: u64,
}

impl Envelope {
    pub fn age(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Duration::from_secs(now.saturating_sub(self.stored_at_secs))
    }
}

pub struct DiskCache {
    base: PathBuf,
    max_bytes: u64,
    compression: bool,
}

impl DiskCache {
    /// Open (and create) the cache directory described by the options.
    pub fn open(opts: &CacheOptions) -> Result<DiskCache> {
        let base = opts.base_path()?;
        let max_bytes = opts.max_size_bytes()?;
        fs::create_dir_all(&base)
            .map_err(|e| Error::Cache(format!("cannot create {}: {e}", base.display())))?;
        Ok(DiskCache {
            base,
            max_bytes,
            compression: opts.compression,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }

    fn key(url: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let key = Self::key(url);
        self.base.join(&key[..2]).join(&key)
    }

    /// Fetch the stored envelope for a URL, or `None` when absent or
    /// unreadable. A corrupt entry is deleted rather than surfaced.
    pub fn get(&self, url: &str) -> Option<Envelope> {
        let path = self.entry_path(url);
        let raw = fs::read(&path).ok()?;

        let decoded = if self.compression {
            let mut out = Vec::new();
            let mut dec = GzDecoder::new(raw.as_slice());
            if dec.read_to_end(&mut out).is_err() {
                tracing::warn!(entry = %path.display(), "dropping unreadable cache entry");
                let _ = fs::remove_file(&path);
                return None;
            }
            out
        } else {
            raw
        };

        match serde_json::from_slice(&decoded) {
            Ok(envelope) => Some(envelope),
            Err(_) => {
                tracing::warn!(entry = %path.display(), "dropping corrupt cache entry");
                let _ = fs::remove_file(&path);
                None
            }
        }
    }

    /// Store an envelope under a URL key and enforce the size cap.
    pub fn put(&self, url: &str, envelope: &Envelope) -> Result<()> {
        let path = self.entry_path(url);
        let dir = path
            .parent()
            .ok_or_else(|| Error::Cache("entry path has no parent".to_string()))?;
        fs::create_dir_all(dir)
            .map_err(|e| Error::Cache(format!("cannot create {}: {e}", dir.display())))?;

        let plain = serde_json::to_vec(envelope)
            .map_err(|e| Error::Cache(format!("cannot encode entry: {e}")))?;
        let bytes = if self.compression {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(&plain)
                .and_then(|_| enc.finish())
                .map_err(|e| Error::Cache(format!("cannot compress entry: {e}")))?
        } else {
            plain
        };

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)
            .map_err(|e| Error::Cache(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::Cache(format!("cannot commit {}: {e}", path.display())))?;

        self.evict();
        Ok(())
    }

    /// Remove every entry under the base path.
    pub fn erase_all(&self) -> Result<()> {
        if self.base.exists() {
            fs::remove_dir_all(&self.base)
                .map_err(|e| Error::Cache(format!("cannot erase {}: {e}", self.base.display())))?;
        }
        fs::create_dir_all(&self.base)
            .map_err(|e| Error::Cache(format!("cannot recreate {}: {e}", self.base.display())))?;
        Ok(())
    }

    /// Drop oldest entries until the total size fits the cap.
    fn evict(&self) {
        let mut entries: Vec<(PathBuf, u64, SystemTime)> = Vec::new();
        let mut total: u64 = 0;

        let shards = match fs::read_dir(&self.base) {
            Ok(rd) => rd,
            Err(_) => return,
        };
        for shard in shards.flatten() {
            let Ok(files) = fs::read_dir(shard.path()) else {
                continue;
            };
            for file in files.flatten() {
                let Ok(meta) = file.metadata() else { continue };
                if !meta.is_file() {
                    continue;
                }
                let modified = meta.modified().unwrap_or(UNIX_EPOCH);
                total += meta.len();
                entries.push((file.path(), meta.len(), modified));
            }
        }

        if total <= self.max_bytes {
            return;
        }

        entries.sort_by_key(|(_, _, modified)| *modified);
        for (path, len, _) in entries {
            if total <= self.max_bytes {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                total = total.saturating_sub(len);
                tracing::debug!(entry = %path.display(), "evicted cache entry");
            }
        }
    }
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_at(dir: &TempDir, compression: bool, max: u64) -> DiskCache {
        let opts = CacheOptions {
            enabled: true,
            path: Some(dir.path().to_path_buf()),
            size: max.to_string(),
            compression,
            ttl: None,
        };
        DiskCache::open(&opts).unwrap()
    }

    fn envelope(body: &[u8]) -> Envelope {
        Envelope {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_vec(),
            stored_at_secs: now_secs(),
        }
    }

    #[test]
    fn roundtrip_plain() {
        let dir = TempDir::new().unwrap();
        let cache = cache_at(&dir, false, 1 << 20);

        let env = envelope(b"[{\"id\":1}]");
        cache.put("https://gitlab.example.com/api/v4/users?page=1", &env).unwrap();

        let got = cache
            .get("https://gitlab.example.com/api/v4/users?page=1")
            .unwrap();
        assert_eq!(got, env);
        assert!(cache.get("https://gitlab.example.com/other").is_none());
    }

    #[test]
    fn roundtrip_compressed() {
        let dir = TempDir::new().unwrap();
        let cache = cache_at(&dir, true, 1 << 20);

        let env = envelope(&vec![b'x'; 32 * 1024]);
        cache.put("https://gitlab.example.com/big", &env).unwrap();

        let got = cache.get("https://gitlab.example.com/big").unwrap();
        assert_eq!(got.body.len(), 32 * 1024);

        // The stored file must actually be smaller than the body.
        let stored = cache.entry_path("https://gitlab.example.com/big");
        assert!(fs::metadata(stored).unwrap().len() < 32 * 1024);
    }

    #[test]
    fn corrupt_entry_is_dropped() {
        let dir = TempDir::new().unwrap();
        let cache = cache_at(&dir, false, 1 << 20);

        let path = cache.entry_path("https://gitlab.example.com/corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not json").unwrap();

        assert!(cache.get("https://gitlab.example.com/corrupt").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn erase_all_empties_the_store() {
        let dir = TempDir::new().unwrap();
        let cache = cache_at(&dir, false, 1 << 20);

        cache.put("https://a.example.com/x", &envelope(b"a")).unwrap();
        cache.put("https://b.example.com/y", &envelope(b"b")).unwrap();
        cache.erase_all().unwrap();

        assert!(cache.get("https://a.example.com/x").is_none());
        assert!(cache.get("https://b.example.com/y").is_none());
    }

    #[test]
    fn eviction_respects_cap() {
        let dir = TempDir::new().unwrap();
        // Cap small enough that only a couple of entries fit.
        let cache = cache_at(&dir, false, 600);

        for i in 0..8 {
            let url = format!("https://gitlab.example.com/entry/{i}");
            cache.put(&url, &envelope(&vec![b'x'; 128])).unwrap();
        }

        let mut total = 0;
        for shard in fs::read_dir(dir.path()).unwrap().flatten() {
            for file in fs::read_dir(shard.path()).unwrap().flatten() {
                total += file.metadata().unwrap().len();
            }
        }
        assert!(total <= 600, "cache grew past cap: {total}");
    }

    #[test]
    fn age_tracks_storage_time() {
        let env = Envelope {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            stored_at_secs: now_secs() - 120,
        };
        assert!(env.age() >= Duration::from_secs(120));
    }
}
