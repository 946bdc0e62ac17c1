//! Rendered-output cache.
//!
//! Rendering shells out to external tools and dominates request latency, so
//! finished images are memoised by request. The cache is consulted before the
//! source is even resolved: a hit never touches the resolver or a renderer.
//!
//! ## Cache keys
//!
//! A key is the SHA-256 hex digest of the request's `(key, value)` pairs
//! (`id`, `region`, `size`, `quality`, `rotation`, `format`), sorted by key,
//! each string prefixed with its byte length, with absent parameters dropped.
//! Two requests that differ only in parameter order or in explicitly-absent
//! fields share a key. The length prefixes keep an `id` containing
//! separators from spelling out another request's fields.
//!
//! Quality and rotation are hashed in decoded form: `default`, `color` and an
//! absent quality are one entry, as are `0`, `0.0` and an absent rotation.
//! Region and size are hashed as the caller spelled them: `full` and an
//! absent region render the same image under different keys. That costs a
//! duplicate entry, never a wrong one.
//!
//! ## Backends
//!
//! | Backend | Storage | Expiry |
//! |---|---|---|
//! | [`MemoryCache`] | `HashMap` behind a `Mutex` | insertion time per entry |
//! | [`DiskCache`] | `<dir>/<key[..2]>/<key>` | file modification time |
//! | [`NullCache`] | nothing | always a miss (`--no-cache`) |
//!
//! ## Failure policy
//!
//! [`fetch`] treats any cache IO error as a miss and logs it; a broken cache
//! slows requests down but never fails them. Entries are written only after
//! the computation succeeds, so partial results are never cached.
//! Concurrent misses for the same key may both render; the later write wins.

use crate::transform::{Quality, RenderParams, Rotation};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

/// Deterministic cache key for a request against source `id`.
pub fn cache_key(id: &str, params: &RenderParams) -> String {
    let quality = normalized_quality(params.quality.as_deref());
    let rotation = normalized_rotation(params.rotation.as_deref());
    let mut fields: Vec<(&str, &str)> = [
        ("id", Some(id)),
        ("region", params.region.as_deref()),
        ("size", params.size.as_deref()),
        ("quality", quality.as_deref()),
        ("rotation", rotation.as_deref()),
        ("format", params.format.as_deref()),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.map(|v| (key, v)))
    .collect();
    fields.sort_unstable_by_key(|(key, _)| *key);

    let mut hasher = Sha256::new();
    for (key, value) in fields {
        for part in [key, value] {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// `default`, `color` and an absent quality render identically.
fn normalized_quality(raw: Option<&str>) -> Option<String> {
    match Quality::decode(raw) {
        Ok(Quality::Default | Quality::Color) => None,
        Ok(Quality::Grey) => Some("grey".into()),
        Ok(Quality::Bitonal) => Some("bitonal".into()),
        Err(_) => raw.map(str::to_owned),
    }
}

/// Any spelling of zero degrees is the identity rotation.
fn normalized_rotation(raw: Option<&str>) -> Option<String> {
    match Rotation::decode(raw) {
        Ok(rotation) if rotation.is_identity() => None,
        Ok(rotation) => Some(rotation.degrees().to_string()),
        Err(_) => raw.map(str::to_owned),
    }
}

/// Storage for rendered bytes, shared across worker threads.
pub trait RenderCache: Send + Sync {
    /// Stored bytes for `key`, unless absent or older than `ttl`.
    fn get(&self, key: &str, ttl: Duration) -> io::Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous entry.
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
}

/// Return the cached value for `key`, or compute, store and return it.
///
/// Errors from `compute` are returned untouched and nothing is stored.
pub fn fetch<E>(
    cache: &dyn RenderCache,
    key: &str,
    ttl: Duration,
    stats: &CacheStats,
    compute: impl FnOnce() -> Result<Vec<u8>, E>,
) -> Result<Vec<u8>, E> {
    match cache.get(key, ttl) {
        Ok(Some(bytes)) => {
            debug!(key, "cache hit");
            stats.hit();
            return Ok(bytes);
        }
        Ok(None) => debug!(key, "cache miss"),
        Err(e) => warn!(key, error = %e, "cache read failed, rendering"),
    }

    let bytes = compute()?;
    stats.miss();
    if let Err(e) = cache.put(key, &bytes) {
        warn!(key, error = %e, "cache write failed");
    }
    Ok(bytes)
}

// ============================================================================
// Backends
// ============================================================================

/// In-process cache; entries vanish with the process.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Instant, Vec<u8>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, HashMap<String, (Instant, Vec<u8>)>>> {
        self.entries
            .lock()
            .map_err(|_| io::Error::other("memory cache lock poisoned"))
    }
}

impl RenderCache for MemoryCache {
    fn get(&self, key: &str, ttl: Duration) -> io::Result<Option<Vec<u8>>> {
        let mut entries = self.lock()?;
        match entries.get(key) {
            Some((stored, bytes)) if stored.elapsed() <= ttl => Ok(Some(bytes.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.lock()?
            .insert(key.to_string(), (Instant::now(), bytes.to_vec()));
        Ok(())
    }
}

/// One file per entry under a root directory, fanned out by key prefix.
pub struct DiskCache {
    root: PathBuf,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<first two hex chars>/<key>`.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or(key);
        self.root.join(shard).join(key)
    }
}

impl RenderCache for DiskCache {
    fn get(&self, key: &str, ttl: Duration) -> io::Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        let modified = match std::fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > ttl {
            debug!(path = %path.display(), "cache entry expired");
            return Ok(None);
        }
        std::fs::read(&path).map(Some)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.entry_path(key);
        let dir = path
            .parent()
            .ok_or_else(|| io::Error::other("cache entry has no parent directory"))?;
        std::fs::create_dir_all(dir)?;

        // Readers never observe a half-written entry
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Stores nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCache;

impl RenderCache for NullCache {
    fn get(&self, _key: &str, _ttl: Duration) -> io::Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _bytes: &[u8]) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Cache hits versus fresh renders, safe to update from worker threads.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU32,
    misses: AtomicU32,
}

impl CacheStats {
    pub fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u32 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u32 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u32 {
        self.hits() + self.misses()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hits() > 0 {
            write!(
                f,
                "{} cached, {} rendered ({} total)",
                self.hits(),
                self.misses(),
                self.total()
            )
        } else {
            write!(f, "{} rendered", self.misses())
        }
    }
}
