//! Request coalescing and batched delivery in front of a [`BlurQueue`].
//!
//! [`ImageBlurrer`] is the caller-facing side of the pipeline. It lives
//! on one thread (its *home* thread) and every call that touches the
//! coalescing tables must come from there:
//!
//! - concurrent requests for the same cache key share one
//!   [`BlurRequest`]; each caller gets its own [`BlurredImageContainer`]
//! - outcomes from the dispatcher arrive over a channel and are collected
//!   for a short batching window, then handed to every waiting listener
//!   in one tick
//! - a caller can cancel its container; the request itself is canceled
//!   only when no caller is left waiting on it
//!
//! The home thread drives delivery by calling [`ImageBlurrer::poll`] or
//! [`ImageBlurrer::pump`] from its own loop.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use frosted_kernel::{CropRegion, RgbaImage, ViewBounds};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, trace};

use crate::blur_queue::BlurQueue;
use crate::cache::ImageCache;
use crate::config::BlurrerConfig;
use crate::container::{BlurListener, BlurredImageContainer, Slot};
use crate::delivery::{Delivery, ResponseDelivery};
use crate::error::BlurError;
use crate::key::BlurKey;
use crate::request::BlurRequest;
use crate::response::BlurResponse;

/// Counters for monitoring coalescing effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoalescerStats {
    /// Blur calls received.
    pub total_requests: u64,
    /// Calls that attached to an in-flight request.
    pub coalesced_requests: u64,
    /// Calls that created a new request.
    pub new_requests: u64,
    /// Requests canceled because every caller withdrew.
    pub canceled_requests: u64,
    /// Batched delivery ticks run.
    pub delivery_ticks: u64,
    /// Listeners notified with a final outcome.
    pub listeners_notified: u64,
}

impl CoalescerStats {
    /// Fraction of calls that were coalesced (0.0 to 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

enum Removal {
    NotFound,
    Removed,
    Emptied,
}

/// One outstanding request and the callers waiting on it.
struct BatchedImageRequest {
    request: Arc<BlurRequest>,
    result: Option<Result<Arc<RgbaImage>, Arc<BlurError>>>,
    containers: Vec<Arc<Slot>>,
}

impl BatchedImageRequest {
    fn new(request: Arc<BlurRequest>, first: Arc<Slot>) -> Self {
        Self {
            request,
            result: None,
            containers: vec![first],
        }
    }

    fn remove_container(&mut self, id: u64) -> Removal {
        let Some(index) = self.containers.iter().position(|s| s.id() == id) else {
            return Removal::NotFound;
        };
        self.containers.remove(index);
        if self.containers.is_empty() {
            Removal::Emptied
        } else {
            Removal::Removed
        }
    }
}

/// Coalescing tables, shared with containers so they can withdraw.
pub(crate) struct CoalescerState {
    in_flight: HashMap<BlurKey, BatchedImageRequest>,
    batched: HashMap<BlurKey, BatchedImageRequest>,
    tick_at: Option<Instant>,
    next_slot: u64,
    stats: CoalescerStats,
}

impl CoalescerState {
    fn new() -> Self {
        Self {
            in_flight: HashMap::new(),
            batched: HashMap::new(),
            tick_at: None,
            next_slot: 0,
            stats: CoalescerStats::default(),
        }
    }

    /// Drop `slot` from whichever table holds it.
    pub(crate) fn withdraw(&mut self, slot: &Slot) {
        let key = slot.key();

        if let Some(entry) = self.in_flight.get_mut(key) {
            match entry.remove_container(slot.id()) {
                Removal::Removed => return,
                Removal::Emptied => {
                    entry.request.cancel();
                    entry.request.mark("canceled-by-last-listener");
                    self.in_flight.remove(key);
                    self.stats.canceled_requests += 1;
                    debug!(%key, "blur request canceled");
                    return;
                }
                Removal::NotFound => {}
            }
        }

        if let Some(entry) = self.batched.get_mut(key)
            && matches!(entry.remove_container(slot.id()), Removal::Emptied)
        {
            self.batched.remove(key);
        }
    }
}

/// Fail with [`BlurError::NotOnHomeThread`] unless called from `home`.
pub(crate) fn ensure_home(home: ThreadId) -> Result<(), BlurError> {
    if thread::current().id() == home {
        Ok(())
    } else {
        Err(BlurError::NotOnHomeThread)
    }
}

/// Coalescing, batching front end of the blur pipeline.
///
/// Construct it on the thread that will receive results; that thread
/// becomes its home thread.
pub struct ImageBlurrer {
    queue: BlurQueue,
    deliveries: Receiver<Delivery>,
    state: Arc<Mutex<CoalescerState>>,
    home: ThreadId,
    batch_delay: Duration,
}

impl ImageBlurrer {
    /// Wrap an existing queue. `deliveries` must be the receiving half of
    /// the [`ResponseDelivery`] the queue was built with.
    #[must_use]
    pub fn new(queue: BlurQueue, deliveries: Receiver<Delivery>, batch_delay: Duration) -> Self {
        Self {
            queue,
            deliveries,
            state: Arc::new(Mutex::new(CoalescerState::new())),
            home: thread::current().id(),
            batch_delay,
        }
    }

    /// Build a queue over `cache`, start its dispatcher and wrap it.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::InvalidConfig`] if `config` fails validation
    /// and [`BlurError::Spawn`] if the dispatcher thread cannot start.
    pub fn start(cache: Arc<dyn ImageCache>, config: &BlurrerConfig) -> Result<Self, BlurError> {
        config.validate()?;
        let (delivery, deliveries) = ResponseDelivery::channel();
        let queue = BlurQueue::new(cache, delivery, config.blur, config.shutdown);
        queue.start()?;
        info!(
            scale_factor = config.blur.scale_factor,
            radius = config.blur.radius,
            batch_delay_ms = config.batch_delay_ms,
            "image blurrer started"
        );
        Ok(Self::new(queue, deliveries, config.batch_delay()))
    }

    /// Request a blur of the whole of `image`.
    ///
    /// See [`blur_cropped`](Self::blur_cropped).
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::NotOnHomeThread`] if called off the home thread.
    pub fn blur(
        &self,
        image: Arc<RgbaImage>,
        cache_key: &str,
        listener: impl BlurListener + 'static,
    ) -> Result<BlurredImageContainer, BlurError> {
        self.blur_cropped(image, cache_key, CropRegion::FULL, listener)
    }

    /// Request a blur of the part of `image` a view occupies.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::NotOnHomeThread`] if called off the home thread.
    pub fn blur_to_bounds(
        &self,
        image: Arc<RgbaImage>,
        cache_key: &str,
        bounds: ViewBounds,
        listener: impl BlurListener + 'static,
    ) -> Result<BlurredImageContainer, BlurError> {
        self.blur_cropped(image, cache_key, bounds.into(), listener)
    }

    /// Request a blur of `crop` of `image`, cached under a key derived
    /// from `cache_key`.
    ///
    /// If a request for the same key is already in flight the caller is
    /// attached to it and no new work is queued. The returned container
    /// is pending until a later [`poll`](Self::poll) delivers the
    /// outcome to `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::NotOnHomeThread`] if called off the home thread.
    pub fn blur_cropped(
        &self,
        image: Arc<RgbaImage>,
        cache_key: &str,
        crop: CropRegion,
        listener: impl BlurListener + 'static,
    ) -> Result<BlurredImageContainer, BlurError> {
        ensure_home(self.home)?;
        let key = BlurKey::derive(cache_key);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.total_requests += 1;
        state.next_slot += 1;
        let slot = Arc::new(Slot::new(state.next_slot, key.clone(), Box::new(listener)));

        match state.in_flight.entry(key) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().containers.push(Arc::clone(&slot));
                state.stats.coalesced_requests += 1;
                trace!(key = %entry.key(), "attached to in-flight blur");
            }
            Entry::Vacant(entry) => {
                let request = Arc::new(BlurRequest::new(image, entry.key().clone(), crop));
                self.queue.add(&request)?;
                entry.insert(BatchedImageRequest::new(request, Arc::clone(&slot)));
                state.stats.new_requests += 1;
            }
        }

        Ok(BlurredImageContainer::new(
            slot,
            Arc::downgrade(&self.state),
            self.home,
        ))
    }

    /// Run every delivery that has arrived and, if its deadline has
    /// passed, the batching tick. Never blocks.
    ///
    /// Returns the number of listeners notified with a final outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::NotOnHomeThread`] if called off the home thread.
    pub fn poll(&self) -> Result<usize, BlurError> {
        ensure_home(self.home)?;
        for delivery in self.deliveries.try_iter() {
            self.run_delivery(delivery);
        }
        Ok(self.tick_if_due())
    }

    /// Wait up to `timeout` for the next delivery or batching tick, then
    /// [`poll`](Self::poll).
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::NotOnHomeThread`] if called off the home thread.
    pub fn pump(&self, timeout: Duration) -> Result<usize, BlurError> {
        ensure_home(self.home)?;
        let deadline = Instant::now() + timeout;
        let wake = self
            .state
            .lock()
            .tick_at
            .map_or(deadline, |tick| tick.min(deadline));

        if let Ok(delivery) = self.deliveries.recv_deadline(wake) {
            self.run_delivery(delivery);
        }
        self.poll()
    }

    /// Pump until nothing is in flight or waiting for a tick, or until
    /// `timeout` passes. Returns `true` if the blurrer went idle.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::NotOnHomeThread`] if called off the home thread.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool, BlurError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump(deadline.saturating_duration_since(Instant::now()))?;
            if self.is_idle() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    /// Returns `true` if no request is in flight or awaiting delivery.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.in_flight.is_empty() && state.batched.is_empty()
    }

    /// Number of keys with an outstanding request.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    /// Change the batching window. Zero delivers completions on the next
    /// [`poll`](Self::poll).
    pub const fn set_batch_delay(&mut self, delay: Duration) {
        self.batch_delay = delay;
    }

    /// Current batching window.
    #[must_use]
    pub const fn batch_delay(&self) -> Duration {
        self.batch_delay
    }

    /// Snapshot of the coalescing counters.
    #[must_use]
    pub fn stats(&self) -> CoalescerStats {
        self.state.lock().stats
    }

    /// Log the coalescing counters at `info`.
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            total_requests = stats.total_requests,
            coalesced = stats.coalesced_requests,
            new_requests = stats.new_requests,
            canceled = stats.canceled_requests,
            ticks = stats.delivery_ticks,
            coalescing_ratio = format!("{:.1}%", stats.coalescing_ratio() * 100.0),
            "blur coalescing statistics"
        );
    }

    /// The queue behind this blurrer.
    #[must_use]
    pub const fn queue(&self) -> &BlurQueue {
        &self.queue
    }

    /// Stop the dispatcher. Pending containers stay pending.
    pub fn stop(&self) {
        self.queue.stop();
    }

    fn run_delivery(&self, delivery: Delivery) {
        delivery.run(|request, response| self.on_response(request, response));
    }

    fn on_response(&self, request: &Arc<BlurRequest>, response: BlurResponse) {
        let key = request.key();

        if response.is_intermediate() {
            let slots = match self.state.lock().in_flight.get(key) {
                Some(entry) if Arc::ptr_eq(&entry.request, request) => entry.containers.clone(),
                _ => return,
            };
            if let Ok(image) = response.result() {
                for slot in &slots {
                    slot.preview(image);
                }
            }
            return;
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(mut entry) = state.in_flight.remove(key) else {
            trace!(%key, "response for a request no longer in flight");
            return;
        };
        if !Arc::ptr_eq(&entry.request, request) {
            trace!(%key, "response for a superseded request");
            state.in_flight.insert(key.clone(), entry);
            return;
        }
        entry.result = Some(response.into_result());

        match state.batched.entry(key.clone()) {
            Entry::Occupied(mut batched) => {
                let batched = batched.get_mut();
                batched.containers.append(&mut entry.containers);
                batched.request = entry.request;
                batched.result = entry.result;
            }
            Entry::Vacant(batched) => {
                batched.insert(entry);
            }
        }

        if state.tick_at.is_none() {
            state.tick_at = Some(Instant::now() + self.batch_delay);
        }
    }

    fn tick_if_due(&self) -> usize {
        let batched = {
            let mut state = self.state.lock();
            match state.tick_at {
                Some(at) if at <= Instant::now() => {}
                _ => return 0,
            }
            state.tick_at = None;
            state.stats.delivery_ticks += 1;
            std::mem::take(&mut state.batched)
        };

        let mut notified = 0;
        for entry in batched.into_values() {
            let Some(result) = entry.result else {
                continue;
            };
            for slot in &entry.containers {
                if slot.complete(&result) {
                    notified += 1;
                }
            }
        }

        self.state.lock().stats.listeners_notified += u64::try_from(notified).unwrap_or(u64::MAX);
        trace!(notified, "batched delivery tick");
        notified
    }
}
