//! Content-addressed blob cache (L1: memory, L2: disk).
//!
//! Blobs are immutable and named by digest, so entries never expire. The
//! disk tier stores each blob at `<dir>/<algorithm>/<hex>`; small blobs
//! (configs, manifests) are also kept in an in-memory LRU.

use crate::digest::Digest;
use crate::error::{DockhandError, Result};
use lru::LruCache;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use walkdir::WalkDir;


/// Blobs larger than this are only cached on disk.
const MEMORY_BLOB_LIMIT: usize = 1024 * 1024;

/// The two operations a blob transfer needs from a cache.
///
/// Implementations must tolerate concurrent `put`s of the same digest; the
/// content is identical, so the last writer wins.
pub trait BlobCache: Send + Sync {
    /// Returns the cached blob for `digest`, if present.
    fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>>;

    /// Stores a fully received blob under `digest`.
    fn put(&self, digest: &Digest, data: &[u8]) -> Result<()>;
}

/// A cache that stores nothing. Used when caching is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl BlobCache for NoCache {
    fn get(&self, _digest: &Digest) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn put(&self, _digest: &Digest, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Statistics about the cache.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of blobs on disk.
    pub disk_entries: u64,
    /// Total size of the disk tier in bytes.
    pub disk_size: u64,
    /// Number of blobs held in memory.
    pub memory_entries: u64,
}

/// Statistics returned after a clear operation.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ClearStats {
    /// The number of files removed.
    pub removed_files: u64,
    /// The total disk space reclaimed in bytes.
    pub reclaimed_space: u64,
}

/// Two-tier blob cache backed by a directory.
///
/// # Examples
///
/// ```no_run
/// use libdockhand::cache::{BlobCache, DiskBlobCache};
/// use libdockhand::Digest;
/// use std::num::NonZeroUsize;
///
/// # fn example() -> libdockhand::error::Result<()> {
/// let cache = DiskBlobCache::new("/tmp/dockhand-blobs".into(), NonZeroUsize::new(64).unwrap());
/// let digest = Digest::sha256(b"{}");
/// cache.put(&digest, b"{}")?;
/// assert_eq!(cache.get(&digest)?, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DiskBlobCache {
    /// The L1 in-memory cache.
    memory: Mutex<LruCache<String, Vec<u8>>>,
    /// The base path of the L2 disk cache.
    disk_path: PathBuf,
}

impl DiskBlobCache {
    /// Creates a cache rooted at `disk_path`. The directory is created on first write.
    pub fn new(disk_path: PathBuf, memory_capacity: NonZeroUsize) -> Self {
        Self {
            memory: Mutex::new(LruCache::new(memory_capacity)),
            disk_path,
        }
    }

    /// Returns `<user cache dir>/dockhand/blobs`.
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dockhand")
            .join("blobs")
    }

    /// Returns the root of the disk tier.
    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }

    /// Removes every cached blob from disk and memory.
    pub fn clear(&self) -> Result<ClearStats> {
        let mut stats = ClearStats::default();

        self.memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        if !self.disk_path.exists() {
            return Ok(stats);
        }

        for entry in WalkDir::new(&self.disk_path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if let Ok(metadata) = std::fs::metadata(path) {
                stats.reclaimed_space += metadata.len();
            }
            if std::fs::remove_file(path).is_ok() {
                stats.removed_files += 1;
            }
        }

        Ok(stats)
    }

    /// Gets statistics about the cache.
    pub fn stats(&self) -> Result<CacheStats> {
        let mut stats = CacheStats {
            memory_entries: self.memory.lock().unwrap_or_else(|e| e.into_inner()).len() as u64,
            ..Default::default()
        };

        if !self.disk_path.exists() {
            return Ok(stats);
        }

        for entry in WalkDir::new(&self.disk_path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }

            if let Ok(metadata) = entry.metadata() {
                stats.disk_entries += 1;
                stats.disk_size += metadata.len();
            }
        }

        Ok(stats)
    }

    /// Converts a digest into its path on disk.
    fn digest_to_path(&self, digest: &Digest) -> Result<PathBuf> {
        let algorithm = digest.algorithm();
        let hex = digest.hex();
        let is_safe = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !is_safe(algorithm) || !is_safe(hex) {
            return Err(DockhandError::validation(format!(
                "Invalid cache key '{}'",
                digest
            )));
        }
        Ok(self.disk_path.join(algorithm).join(hex))
    }

    fn remember(&self, key: String, data: &[u8]) {
        if data.len() <= MEMORY_BLOB_LIMIT {
            self.memory
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .put(key, data.to_vec());
        }
    }
}

impl BlobCache for DiskBlobCache {
    fn get(&self, digest: &Digest) -> Result<Option<Vec<u8>>> {
        let key = digest.to_string();

        // L1 Check
        if let Some(data) = self
            .memory
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(Some(data.clone()));
        }

        // L2 Check
        let path = self.digest_to_path(digest)?;
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DockhandError::io(
                    format!("Failed to read cached blob {}", path.display()),
                    e,
                ));
            }
        };

        if !digest.verify(&data) {
            tracing::warn!(%digest, path = %path.display(), "Discarding corrupt cache entry");
            let _ = std::fs::remove_file(&path);
            return Ok(None);
        }

        // Hydrate L1 cache
        self.remember(key, &data);
        Ok(Some(data))
    }

    fn put(&self, digest: &Digest, data: &[u8]) -> Result<()> {
        let path = self.digest_to_path(digest)?;
        let parent = path.parent().unwrap_or(&self.disk_path);
        std::fs::create_dir_all(parent).map_err(|e| {
            DockhandError::io(
                format!("Failed to create cache directory {}", parent.display()),
                e,
            )
        })?;

        // Write to a sibling temp file, then rename into place
        let mut file = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
            DockhandError::io(
                format!("Failed to create temporary file in {}", parent.display()),
                e,
            )
        })?;
        file.write_all(data).map_err(|e| {
            DockhandError::io(format!("Failed to write cached blob {}", digest), e)
        })?;
        file.persist(&path).map_err(|e| {
            DockhandError::io(format!("Failed to store cached blob {}", path.display()), e.error)
        })?;

        self.remember(digest.to_string(), data);
        Ok(())
    }
}
