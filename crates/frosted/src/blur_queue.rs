//! Owner of the work queue and its dispatcher thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use frosted_kernel::BlurConfig;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::cache::ImageCache;
use crate::config::ShutdownPolicy;
use crate::delivery::ResponseDelivery;
use crate::dispatcher::BlurDispatcher;
use crate::error::BlurError;
use crate::queue::PriorityWorkQueue;
use crate::request::{BlurRequest, RequestTracker};

/// Name of the dispatcher thread.
pub const DISPATCHER_THREAD_NAME: &str = "frosted-dispatcher";

/// A blur work queue with a single dispatcher thread behind it.
///
/// `add` assigns each request the next sequence number and enqueues it;
/// the dispatcher processes requests in that order and posts outcomes to
/// the [`ResponseDelivery`] it was built with.
pub struct BlurQueue {
    next_sequence: AtomicU64,
    current: Arc<RequestTracker>,
    queue: Arc<PriorityWorkQueue>,
    cache: Arc<dyn ImageCache>,
    delivery: ResponseDelivery,
    config: BlurConfig,
    shutdown: ShutdownPolicy,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl BlurQueue {
    /// Create a stopped queue. Call [`start`](Self::start) to begin
    /// processing.
    #[must_use]
    pub fn new(
        cache: Arc<dyn ImageCache>,
        delivery: ResponseDelivery,
        config: BlurConfig,
        shutdown: ShutdownPolicy,
    ) -> Self {
        Self {
            next_sequence: AtomicU64::new(0),
            current: Arc::new(RequestTracker::default()),
            queue: Arc::new(PriorityWorkQueue::new()),
            cache,
            delivery,
            config,
            shutdown,
            dispatcher: Mutex::new(None),
        }
    }

    /// Start the dispatcher thread, stopping any running one first.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::Spawn`] if the thread cannot be created.
    pub fn start(&self) -> Result<(), BlurError> {
        self.stop();
        self.queue.reopen();

        let dispatcher = BlurDispatcher::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.cache),
            self.delivery.clone(),
            self.config,
        );
        let handle = thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || dispatcher.run())
            .map_err(BlurError::Spawn)?;

        *self.dispatcher.lock() = Some(handle);
        debug!(shutdown = ?self.shutdown, "blur queue started");
        Ok(())
    }

    /// Stop the dispatcher thread and wait for it to exit.
    ///
    /// With [`ShutdownPolicy::Abandon`] queued requests stay queued and
    /// are picked up by the next [`start`](Self::start); with
    /// [`ShutdownPolicy::Drain`] they are processed before this returns.
    pub fn stop(&self) {
        let Some(handle) = self.dispatcher.lock().take() else {
            return;
        };
        self.queue.close(self.shutdown);
        if handle.join().is_err() {
            warn!("blur dispatcher thread panicked");
        }
        debug!(queued = self.queue.len(), "blur queue stopped");
    }

    /// Returns `true` while a dispatcher thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.dispatcher.lock().is_some()
    }

    /// Assign `request` the next sequence number and enqueue it.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::AlreadyQueued`] if `request` was added before.
    /// A request is enqueued at most once.
    pub fn add(&self, request: &Arc<BlurRequest>) -> Result<(), BlurError> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        if !request.assign_sequence(sequence) {
            let first = request.sequence()?;
            warn!(key = %request.key(), sequence = first, "request added twice");
            return Err(BlurError::AlreadyQueued(first));
        }
        request.attach(&self.current);
        self.current.insert(sequence);
        request.mark("add-to-queue");

        if let Err(err) = self.queue.add(Arc::clone(request)) {
            warn!(key = %request.key(), error = %err, "request not enqueued");
            request.finish("add-rejected");
        }
        Ok(())
    }

    /// Requests added but not yet finished.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.current.len()
    }

    /// Requests waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// The cache the dispatcher reads and writes.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ImageCache> {
        &self.cache
    }

    /// Blur settings used by the dispatcher.
    #[must_use]
    pub const fn config(&self) -> &BlurConfig {
        &self.config
    }
}

impl Drop for BlurQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::Receiver;
    use frosted_kernel::{CropRegion, RgbaImage};

    use super::*;
    use crate::cache::MemoryCache;
    use crate::delivery::Delivery;
    use crate::key::BlurKey;

    fn new_queue(shutdown: ShutdownPolicy) -> (BlurQueue, Receiver<Delivery>) {
        let (delivery, rx) = ResponseDelivery::channel();
        let queue = BlurQueue::new(
            Arc::new(MemoryCache::new(1 << 20)),
            delivery,
            BlurConfig::default(),
            shutdown,
        );
        (queue, rx)
    }

    fn request(name: &str) -> Arc<BlurRequest> {
        Arc::new(BlurRequest::new(
            Arc::new(RgbaImage::from_pixel(32, 32, image::Rgba([1, 2, 3, 255]))),
            BlurKey::derive(name),
            CropRegion::FULL,
        ))
    }

    #[test]
    fn sequences_increase_from_one() {
        let (queue, _rx) = new_queue(ShutdownPolicy::Abandon);
        let a = request("a");
        let b = request("b");
        queue.add(&a).unwrap();
        queue.add(&b).unwrap();
        assert_eq!(a.sequence().unwrap(), 1);
        assert_eq!(b.sequence().unwrap(), 2);
        assert_eq!(queue.pending(), 2);
        assert_eq!(queue.queued(), 2);
    }

    #[test]
    fn adding_a_request_twice_is_rejected() {
        let (queue, rx) = new_queue(ShutdownPolicy::Abandon);
        let req = request("a");
        queue.add(&req).unwrap();

        let err = queue.add(&req).unwrap_err();
        assert!(matches!(err, BlurError::AlreadyQueued(1)));
        assert_eq!(req.sequence().unwrap(), 1);
        assert_eq!(queue.queued(), 1);
        assert_eq!(queue.pending(), 1);

        queue.start().unwrap();
        rx.recv_timeout(Duration::from_secs(5))
            .unwrap()
            .run(|_, response| assert!(response.is_success()));
        queue.stop();

        assert!(rx.try_recv().is_err());
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn started_queue_processes_and_finishes_requests() {
        let (queue, rx) = new_queue(ShutdownPolicy::Abandon);
        queue.start().unwrap();
        assert!(queue.is_running());

        let req = request("a");
        queue.add(&req).unwrap();
        let delivery = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        delivery.run(|_, response| assert!(response.is_success()));

        assert!(req.is_finished());
        assert_eq!(queue.pending(), 0);
        queue.stop();
        assert!(!queue.is_running());
    }

    #[test]
    fn abandoned_requests_resume_after_restart() {
        let (queue, rx) = new_queue(ShutdownPolicy::Abandon);
        let req = request("a");
        queue.add(&req).unwrap();

        queue.start().unwrap();
        queue.stop();
        queue.start().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn drain_processes_queued_requests_on_stop() {
        let (queue, rx) = new_queue(ShutdownPolicy::Drain);
        for name in ["a", "b", "c"] {
            queue.add(&request(name)).unwrap();
        }
        queue.start().unwrap();
        queue.stop();

        assert_eq!(queue.queued(), 0);
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn stop_without_start_is_a_no_op() {
        let (queue, _rx) = new_queue(ShutdownPolicy::Abandon);
        queue.stop();
        assert!(!queue.is_running());
    }
}
