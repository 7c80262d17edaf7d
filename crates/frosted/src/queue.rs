//! Unbounded, blocking priority queue of blur requests.
//!
//! Requests are ordered by ascending sequence number, so with sequence
//! numbers handed out in arrival order the queue is strictly FIFO. Any
//! thread may [`add`](PriorityWorkQueue::add); a single consumer blocks
//! in [`take`](PriorityWorkQueue::take).
//!
//! Closing the queue wakes the consumer. Under
//! [`ShutdownPolicy::Abandon`] `take` returns `None` straight away and
//! queued requests stay where they are; under [`ShutdownPolicy::Drain`]
//! `take` keeps handing out queued requests until the queue is empty.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::config::ShutdownPolicy;
use crate::error::BlurError;
use crate::request::BlurRequest;

/// Heap entry ordered so the smallest sequence is popped first.
struct Queued {
    sequence: u64,
    request: Arc<BlurRequest>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other.sequence.cmp(&self.sequence)
    }
}

struct State {
    heap: BinaryHeap<Queued>,
    closed: Option<ShutdownPolicy>,
}

/// Thread-safe FIFO of [`BlurRequest`]s keyed by sequence number.
pub struct PriorityWorkQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl PriorityWorkQueue {
    /// Create an empty, open queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                closed: None,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a request. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::SequenceUnassigned`] if the request has no
    /// sequence number.
    pub fn add(&self, request: Arc<BlurRequest>) -> Result<(), BlurError> {
        let sequence = request.sequence()?;
        self.state.lock().heap.push(Queued { sequence, request });
        self.available.notify_one();
        Ok(())
    }

    /// Block until a request is available and return the one with the
    /// lowest sequence number.
    ///
    /// Returns `None` once the queue is closed (see the module docs for
    /// how the shutdown policy affects queued requests).
    pub fn take(&self) -> Option<Arc<BlurRequest>> {
        let mut state = self.state.lock();
        loop {
            match state.closed {
                Some(ShutdownPolicy::Abandon) => return None,
                Some(ShutdownPolicy::Drain) => return state.heap.pop().map(|q| q.request),
                None => {}
            }
            if let Some(queued) = state.heap.pop() {
                return Some(queued.request);
            }
            self.available.wait(&mut state);
        }
    }

    /// Close the queue and wake the consumer.
    pub fn close(&self, policy: ShutdownPolicy) {
        self.state.lock().closed = Some(policy);
        self.available.notify_all();
    }

    /// Reopen a closed queue. Requests left behind by an abandoning
    /// shutdown become available again.
    pub fn reopen(&self) {
        self.state.lock().closed = None;
        self.available.notify_all();
    }

    /// Number of queued requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PriorityWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
