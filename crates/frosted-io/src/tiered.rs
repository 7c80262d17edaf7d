//! Memory cache in front of a disk cache.

use std::sync::Arc;

use frosted::{ImageCache, MemoryCache, RgbaImage};
use tracing::trace;

use crate::disk::DiskCache;

/// Two-level cache: lookups try memory first, then disk, promoting disk
/// hits into memory. Writes go to both levels.
pub struct TieredCache {
    memory: MemoryCache,
    disk: DiskCache,
}

impl TieredCache {
    /// Combine the two levels.
    #[must_use]
    pub const fn new(memory: MemoryCache, disk: DiskCache) -> Self {
        Self { memory, disk }
    }

    /// The in-memory level.
    #[must_use]
    pub const fn memory(&self) -> &MemoryCache {
        &self.memory
    }

    /// The on-disk level.
    #[must_use]
    pub const fn disk(&self) -> &DiskCache {
        &self.disk
    }
}

impl ImageCache for TieredCache {
    fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        if let Some(image) = self.memory.get(key) {
            trace!(key, "memory cache hit");
            return Some(image);
        }
        let image = self.disk.get(key)?;
        trace!(key, "disk cache hit, promoting");
        self.memory.put(key, Arc::clone(&image));
        Some(image)
    }

    fn put(&self, key: &str, image: Arc<RgbaImage>) {
        self.disk.put(key, Arc::clone(&image));
        self.memory.put(key, image);
    }
}
