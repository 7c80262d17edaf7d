//! The background loop that turns queued requests into responses.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use frosted_kernel::BlurConfig;
use tracing::{debug, warn};

use crate::cache::ImageCache;
use crate::delivery::ResponseDelivery;
use crate::error::BlurError;
use crate::queue::PriorityWorkQueue;
use crate::request::BlurRequest;
use crate::response::BlurResponse;

/// Single-threaded consumer of a [`PriorityWorkQueue`].
///
/// For each request taken from the queue:
///
/// 1. canceled requests are finished without touching the cache
/// 2. a cache hit is delivered as-is, without blurring
/// 3. a miss is blurred and delivered, then written to the cache unless
///    the request was canceled in the meantime
///
/// A failing or panicking blur fails only its own request.
pub struct BlurDispatcher {
    queue: Arc<PriorityWorkQueue>,
    cache: Arc<dyn ImageCache>,
    delivery: ResponseDelivery,
    config: BlurConfig,
}

impl BlurDispatcher {
    /// Create a dispatcher. Nothing runs until [`run`](Self::run).
    #[must_use]
    pub fn new(
        queue: Arc<PriorityWorkQueue>,
        cache: Arc<dyn ImageCache>,
        delivery: ResponseDelivery,
        config: BlurConfig,
    ) -> Self {
        Self {
            queue,
            cache,
            delivery,
            config,
        }
    }

    /// Process requests until the queue is closed.
    pub fn run(self) {
        debug!("blur dispatcher started");
        while let Some(request) = self.queue.take() {
            self.process(&request);
        }
        debug!("blur dispatcher stopped");
    }

    fn process(&self, request: &Arc<BlurRequest>) {
        request.mark("blur-queue-take");

        if request.is_canceled() {
            request.finish("blur-discard-canceled");
            return;
        }

        let key = request.key().as_str();
        if let Some(cached) = self.cache.get(key) {
            request.mark("blur-cache-hit");
            self.delivery
                .post_response(request, BlurResponse::success(cached));
            return;
        }
        request.mark("blur-cache-miss");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            frosted_kernel::blur(request.source(), request.crop(), &self.config)
        }));

        match outcome {
            Ok(Ok(blurred)) => {
                let blurred = Arc::new(blurred);
                request.mark("blur-image-complete");
                self.delivery
                    .post_response(request, BlurResponse::success(Arc::clone(&blurred)));

                if request.is_canceled() {
                    request.finish("blur-insert-cache-canceled");
                } else {
                    self.cache.put(key, blurred);
                }
            }
            Ok(Err(err)) => {
                debug!(key, error = %err, "blur failed");
                self.delivery.post_error(request, BlurError::Transform(err));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(key, %message, "blur panicked");
                self.delivery
                    .post_error(request, BlurError::Panicked(message));
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
