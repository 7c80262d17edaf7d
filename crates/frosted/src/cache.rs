//! Blurred image cache capability and an in-memory implementation.
//!
//! The dispatcher only needs `get` and `put`. Eviction, persistence and
//! sizing belong to the implementation. [`MemoryCache`] is a byte-bounded
//! LRU; a disk-backed cache lives in `frosted-io`.

use std::sync::Arc;

use frosted_kernel::RgbaImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

/// Storage for blurred images, keyed by [`BlurKey`](crate::BlurKey) string.
///
/// Implementations must tolerate concurrent `get`/`put` from the
/// dispatcher thread and from any other thread holding the cache.
pub trait ImageCache: Send + Sync {
    /// Look up a cached image.
    fn get(&self, key: &str) -> Option<Arc<RgbaImage>>;

    /// Store an image, replacing any previous entry for `key`.
    fn put(&self, key: &str, image: Arc<RgbaImage>);
}

impl<T: ImageCache + ?Sized> ImageCache for Arc<T> {
    fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, image: Arc<RgbaImage>) {
        (**self).put(key, image);
    }
}

/// Number of bytes an image occupies in a cache.
#[must_use]
pub fn image_size_bytes(image: &RgbaImage) -> usize {
    image.as_raw().len()
}

/// In-memory LRU cache bounded by total pixel bytes.
pub struct MemoryCache {
    inner: Mutex<MemoryInner>,
    max_size_bytes: usize,
}

struct MemoryInner {
    entries: LruCache<String, Arc<RgbaImage>>,
    size_bytes: usize,
}

impl MemoryCache {
    /// Create a cache holding at most `max_size_bytes` of pixel data.
    #[must_use]
    pub fn new(max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: LruCache::unbounded(),
                size_bytes: 0,
            }),
            max_size_bytes,
        }
    }

    /// Bytes currently held.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().size_bytes
    }

    /// Number of cached images.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured byte budget.
    #[must_use]
    pub const fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }
}

impl ImageCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<RgbaImage>> {
        self.inner.lock().entries.get(key).cloned()
    }

    fn put(&self, key: &str, image: Arc<RgbaImage>) {
        let size = image_size_bytes(&image);
        let mut inner = self.inner.lock();

        if size > self.max_size_bytes {
            // The old image for this key is stale now.
            if let Some(previous) = inner.entries.pop(key) {
                inner.size_bytes -= image_size_bytes(&previous);
            }
            trace!(key, size, "image larger than memory cache budget, not cached");
            return;
        }

        if let Some(previous) = inner.entries.put(key.to_string(), image) {
            inner.size_bytes -= image_size_bytes(&previous);
        }
        inner.size_bytes += size;

        while inner.size_bytes > self.max_size_bytes {
            let Some((evicted_key, evicted)) = inner.entries.pop_lru() else {
                break;
            };
            inner.size_bytes -= image_size_bytes(&evicted);
            trace!(key = %evicted_key, "evicted from memory cache");
        }
    }
}
