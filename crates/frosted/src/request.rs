//! A single unit of blur work and its lifecycle bookkeeping.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use frosted_kernel::{CropRegion, RgbaImage};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::BlurError;
use crate::key::BlurKey;

/// Requests alive longer than this are logged at `warn` when they finish.
pub const SLOW_REQUEST_THRESHOLD: Duration = Duration::from_millis(3000);

/// One blur job: a source image, the key its result is cached under,
/// and the region to blur.
///
/// Created once per coalesced key, enqueued once, dequeued once by the
/// dispatcher, and dropped after its outcome has been delivered. The
/// source image is shared, never mutated.
#[derive(Debug)]
pub struct BlurRequest {
    source: Arc<RgbaImage>,
    key: BlurKey,
    crop: CropRegion,
    sequence: OnceLock<u64>,
    canceled: AtomicBool,
    delivered: AtomicBool,
    finished: AtomicBool,
    tracker: OnceLock<Weak<RequestTracker>>,
    born: Instant,
}

impl BlurRequest {
    /// Create a request. The sequence number is assigned when it is added
    /// to a [`BlurQueue`](crate::BlurQueue).
    #[must_use]
    pub fn new(source: Arc<RgbaImage>, key: BlurKey, crop: CropRegion) -> Self {
        Self {
            source,
            key,
            crop,
            sequence: OnceLock::new(),
            canceled: AtomicBool::new(false),
            delivered: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            tracker: OnceLock::new(),
            born: Instant::now(),
        }
    }

    /// The image to blur.
    #[must_use]
    pub fn source(&self) -> &RgbaImage {
        &self.source
    }

    /// Cache key of the blurred result.
    #[must_use]
    pub const fn key(&self) -> &BlurKey {
        &self.key
    }

    /// Region of the source to blur.
    #[must_use]
    pub const fn crop(&self) -> CropRegion {
        self.crop
    }

    /// Position of this request in FIFO order.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::SequenceUnassigned`] if the request has not
    /// been added to a queue yet.
    pub fn sequence(&self) -> Result<u64, BlurError> {
        self.sequence
            .get()
            .copied()
            .ok_or(BlurError::SequenceUnassigned)
    }

    /// Assign the sequence number. Returns `false`, leaving the first
    /// number in place, if one was already assigned.
    pub(crate) fn assign_sequence(&self, sequence: u64) -> bool {
        self.sequence.set(sequence).is_ok()
    }

    /// Returns `true` once the request has been canceled.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Mark the request canceled. The dispatcher skips canceled requests,
    /// never caches their result, and delivery drops their outcome.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Record that a response has been posted for this request.
    pub fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::Release);
    }

    /// Returns `true` if a response has been posted for this request.
    #[must_use]
    pub fn has_had_response_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    /// Record a lifecycle event.
    pub fn mark(&self, marker: &'static str) {
        trace!(
            key = %self.key,
            sequence = self.sequence.get().copied(),
            marker,
            elapsed_ms = elapsed_ms(self.born),
            "blur request",
        );
    }

    /// Finish the request: drop it from its queue's current set and log
    /// its lifetime. Only the first call has any effect.
    pub fn finish(&self, marker: &'static str) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }

        if let (Some(tracker), Some(&sequence)) = (
            self.tracker.get().and_then(Weak::upgrade),
            self.sequence.get(),
        ) {
            tracker.remove(sequence);
        }

        let elapsed = self.born.elapsed();
        if elapsed >= SLOW_REQUEST_THRESHOLD {
            warn!(
                key = %self.key,
                sequence = self.sequence.get().copied(),
                marker,
                elapsed_ms = elapsed_ms(self.born),
                "slow blur request",
            );
        } else {
            debug!(
                key = %self.key,
                sequence = self.sequence.get().copied(),
                marker,
                elapsed_ms = elapsed_ms(self.born),
                "blur request finished",
            );
        }
    }

    /// Returns `true` once [`finish`](Self::finish) has run.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn attach(&self, tracker: &Arc<RequestTracker>) {
        let _ = self.tracker.set(Arc::downgrade(tracker));
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Sequence numbers of requests that are queued or being processed.
#[derive(Debug, Default)]
pub(crate) struct RequestTracker {
    current: Mutex<HashSet<u64>>,
}

impl RequestTracker {
    pub(crate) fn insert(&self, sequence: u64) {
        self.current.lock().insert(sequence);
    }

    fn remove(&self, sequence: u64) {
        self.current.lock().remove(&sequence);
    }

    pub(crate) fn len(&self) -> usize {
        self.current.lock().len()
    }
}
