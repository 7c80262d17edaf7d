//! frosted-io: filesystem collaborators for the frosted blur pipeline.
//!
//! - [`DiskCache`]: byte-bounded cache of PNG files
//! - [`TieredCache`]: a [`MemoryCache`](frosted::MemoryCache) in front of
//!   a [`DiskCache`]
//! - [`load_image`] / [`save_png`]: reading sources and writing results
//!
//! Both caches implement [`ImageCache`](frosted::ImageCache) and can be
//! handed straight to [`ImageBlurrer::start`](frosted::ImageBlurrer::start).

pub mod disk;
pub mod load;
pub mod tiered;

pub use disk::{DiskCache, DiskCacheError};
pub use load::{ImageFileError, decode_image, load_image, save_png};
pub use tiered::TieredCache;
