//! frosted: a request-coalescing, cached, background image blur pipeline.
//!
//! Callers on one *home* thread ask an [`ImageBlurrer`] for the blurred
//! variant of an image under a cache key. Requests for the same key are
//! merged, the blur itself runs on a single dispatcher thread, and
//! results come back to the home thread in batched ticks:
//!
//! ```text
//! ImageBlurrer::blur -> BlurQueue -> PriorityWorkQueue -> BlurDispatcher
//!                                                         (cache / blur)
//! listener <- ImageBlurrer::poll <- ResponseDelivery <------+
//! ```
//!
//! The pixel work lives in `frosted-kernel`; storage is anything that
//! implements [`ImageCache`].

pub mod blur_queue;
pub mod blurrer;
pub mod cache;
pub mod config;
pub mod container;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod key;
pub mod queue;
pub mod request;
pub mod response;

pub use blur_queue::BlurQueue;
pub use blurrer::{CoalescerStats, ImageBlurrer};
pub use cache::{ImageCache, MemoryCache};
pub use config::{BlurrerConfig, ShutdownPolicy};
pub use container::{BlurEvent, BlurListener, BlurredImageContainer, ContainerStatus};
pub use delivery::{Delivery, ResponseDelivery};
pub use dispatcher::BlurDispatcher;
pub use error::BlurError;
pub use frosted_kernel::{BlurConfig, BlurKernel, CropRegion, RgbaImage, ViewBounds};
pub use key::BlurKey;
pub use queue::PriorityWorkQueue;
pub use request::BlurRequest;
pub use response::BlurResponse;
