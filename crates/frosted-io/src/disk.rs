//! PNG-on-disk cache of blurred images.
//!
//! Each entry is one `<key>.png` file in the cache directory. The total
//! size of those files is bounded; when a write pushes it over the
//! limit, least recently used entries are deleted until the cache is
//! back under [`EVICTION_TARGET`] of the limit.
//!
//! Recency is tracked in memory. Entries found on disk when the cache
//! is opened are ranked by file modification time.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use frosted::{ImageCache, RgbaImage};
use image::ImageFormat;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Fraction of the size limit the cache is trimmed to on eviction.
pub const EVICTION_TARGET: f64 = 0.9;

const EXTENSION: &str = "png";

/// Errors from [`DiskCache`] operations.
#[derive(Debug, thiserror::Error)]
pub enum DiskCacheError {
    /// Filesystem access failed.
    #[error("disk cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cached file could not be encoded or decoded.
    #[error("disk cache image error: {0}")]
    Image(#[from] image::ImageError),

    /// The key cannot be used as a file name.
    #[error("invalid disk cache key: {0:?}")]
    InvalidKey(String),
}

#[derive(Debug, Clone, Copy)]
struct DiskEntry {
    size: u64,
    last_used: u64,
}

#[derive(Debug, Default)]
struct DiskIndex {
    entries: HashMap<String, DiskEntry>,
    total_bytes: u64,
    clock: u64,
}

impl DiskIndex {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn insert(&mut self, key: String, size: u64) {
        let last_used = self.tick();
        if let Some(previous) = self.entries.insert(key, DiskEntry { size, last_used }) {
            self.total_bytes -= previous.size;
        }
        self.total_bytes += size;
    }

    fn remove(&mut self, key: &str) -> Option<DiskEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size;
        Some(entry)
    }

    fn touch(&mut self, key: &str) {
        let now = self.tick();
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = now;
        }
    }

    /// Keys to delete, oldest first, to get down to `target` bytes.
    fn victims(&self, target: u64) -> Vec<String> {
        let mut by_age: Vec<_> = self.entries.iter().collect();
        by_age.sort_by_key(|(_, entry)| entry.last_used);

        let mut remaining = self.total_bytes;
        let mut victims = Vec::new();
        for (key, entry) in by_age {
            if remaining <= target {
                break;
            }
            remaining -= entry.size;
            victims.push(key.clone());
        }
        victims
    }
}

/// Byte-bounded cache of PNG files under one directory.
pub struct DiskCache {
    dir: PathBuf,
    max_size_bytes: u64,
    index: Mutex<DiskIndex>,
}

impl DiskCache {
    /// Open (creating if needed) a cache rooted at `dir`.
    ///
    /// Existing `.png` files are indexed; if they already exceed
    /// `max_size_bytes` the oldest are evicted.
    ///
    /// # Errors
    ///
    /// Returns [`DiskCacheError::Io`] if the directory cannot be created
    /// or listed.
    pub fn open(dir: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self, DiskCacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_key(key) {
                continue;
            }
            let metadata = entry.metadata()?;
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, key.to_string(), metadata.len()));
        }
        found.sort();

        let mut index = DiskIndex::default();
        for (_, key, size) in found {
            index.insert(key, size);
        }

        let cache = Self {
            dir,
            max_size_bytes,
            index: Mutex::new(index),
        };
        info!(
            dir = %cache.dir.display(),
            entries = cache.len(),
            size_bytes = cache.size_bytes(),
            max_size_bytes,
            "disk cache opened"
        );
        cache.evict_if_over_limit();
        Ok(cache)
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total bytes of cached files.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.index.lock().total_bytes
    }

    /// Number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read an entry.
    ///
    /// A file that exists but cannot be decoded is deleted and reported
    /// as an error.
    ///
    /// # Errors
    ///
    /// Returns [`DiskCacheError::InvalidKey`] for keys that are not
    /// plain file names, [`DiskCacheError::Io`] or
    /// [`DiskCacheError::Image`] if the file cannot be read.
    pub fn load(&self, key: &str) -> Result<Option<RgbaImage>, DiskCacheError> {
        let path = self.path_for(key)?;
        if !self.index.lock().entries.contains_key(key) {
            return Ok(None);
        }

        match image::open(&path) {
            Ok(image) => {
                self.index.lock().touch(key);
                Ok(Some(image.to_rgba8()))
            }
            Err(err) => {
                self.index.lock().remove(key);
                let _ = fs::remove_file(&path);
                Err(err.into())
            }
        }
    }

    /// Write an entry, replacing any previous one, then evict if the
    /// cache is over its limit.
    ///
    /// # Errors
    ///
    /// Returns [`DiskCacheError::InvalidKey`] for keys that are not
    /// plain file names, [`DiskCacheError::Io`] or
    /// [`DiskCacheError::Image`] if the file cannot be written.
    pub fn store(&self, key: &str, image: &RgbaImage) -> Result<(), DiskCacheError> {
        let path = self.path_for(key)?;
        let staging = path.with_extension("png.tmp");

        image.save_with_format(&staging, ImageFormat::Png)?;
        fs::rename(&staging, &path)?;
        let size = fs::metadata(&path)?.len();

        self.index.lock().insert(key.to_string(), size);
        self.evict_if_over_limit();
        Ok(())
    }

    /// Delete every entry.
    ///
    /// # Errors
    ///
    /// Returns [`DiskCacheError::Io`] if a file cannot be removed.
    pub fn clear(&self) -> Result<(), DiskCacheError> {
        let keys: Vec<String> = self.index.lock().entries.keys().cloned().collect();
        for key in keys {
            self.remove(&key)?;
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), DiskCacheError> {
        self.index.lock().remove(key);
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn evict_if_over_limit(&self) {
        let victims = {
            let index = self.index.lock();
            if index.total_bytes <= self.max_size_bytes {
                return;
            }
            index.victims(eviction_target(self.max_size_bytes))
        };

        let count = victims.len();
        for key in victims {
            if let Err(err) = self.remove(&key) {
                warn!(%key, error = %err, "failed to evict disk cache entry");
            }
        }
        debug!(
            evicted = count,
            size_bytes = self.size_bytes(),
            "disk cache eviction"
        );
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, DiskCacheError> {
        if !is_valid_key(key) {
            return Err(DiskCacheError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.{EXTENSION}")))
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn eviction_target(max_size_bytes: u64) -> u64 {
    (max_size_bytes as f64 * EVICTION_TARGET) as u64
}

impl ImageCache for DiskCache {
    fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        match self.load(key) {
            Ok(image) => image.map(Arc::new),
            Err(err) => {
                warn!(key, error = %err, "disk cache read failed");
                None
            }
        }
    }

    fn put(&self, key: &str, image: Arc<RgbaImage>) {
        if let Err(err) = self.store(key, &image) {
            warn!(key, error = %err, "disk cache write failed");
        }
    }
}
