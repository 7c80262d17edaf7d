//! Per-caller handles onto a coalesced blur request.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use frosted_kernel::RgbaImage;
use parking_lot::Mutex;

use crate::blurrer::{CoalescerState, ensure_home};
use crate::error::BlurError;
use crate::key::BlurKey;

/// What a listener is told about its request.
#[derive(Debug, Clone)]
pub enum BlurEvent {
    /// The blurred image is available.
    Ready {
        image: Arc<RgbaImage>,
        /// `true` for a provisional image delivered ahead of the final
        /// one; the listener will be called again.
        immediate: bool,
    },
    /// The blur failed. No image will follow.
    Failed(Arc<BlurError>),
}

/// Receives the outcome of a blur request on the home thread.
///
/// A listener is called at most once with a final event. Canceled
/// containers are never called.
pub trait BlurListener: Send {
    fn on_event(&mut self, event: BlurEvent);
}

impl<F> BlurListener for F
where
    F: FnMut(BlurEvent) + Send,
{
    fn on_event(&mut self, event: BlurEvent) {
        self(event);
    }
}

/// Where a container is in its lifecycle.
#[derive(Debug, Clone)]
pub enum ContainerStatus {
    Pending,
    Ready(Arc<RgbaImage>),
    Failed(Arc<BlurError>),
    Canceled,
}

/// Shared state behind a [`BlurredImageContainer`]. The coalescer holds
/// one reference per interested caller; the container holds the other.
pub(crate) struct Slot {
    id: u64,
    key: BlurKey,
    status: Mutex<ContainerStatus>,
    listener: Mutex<Option<Box<dyn BlurListener>>>,
}

impl Slot {
    pub(crate) fn new(id: u64, key: BlurKey, listener: Box<dyn BlurListener>) -> Self {
        Self {
            id,
            key,
            status: Mutex::new(ContainerStatus::Pending),
            listener: Mutex::new(Some(listener)),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) const fn key(&self) -> &BlurKey {
        &self.key
    }

    /// Record the final outcome and call the listener. Returns `false`
    /// if the slot was no longer pending.
    pub(crate) fn complete(&self, result: &Result<Arc<RgbaImage>, Arc<BlurError>>) -> bool {
        let event = {
            let mut status = self.status.lock();
            if !matches!(*status, ContainerStatus::Pending) {
                return false;
            }
            match result {
                Ok(image) => {
                    *status = ContainerStatus::Ready(Arc::clone(image));
                    BlurEvent::Ready {
                        image: Arc::clone(image),
                        immediate: false,
                    }
                }
                Err(err) => {
                    *status = ContainerStatus::Failed(Arc::clone(err));
                    BlurEvent::Failed(Arc::clone(err))
                }
            }
        };

        let listener = self.listener.lock().take();
        if let Some(mut listener) = listener {
            listener.on_event(event);
        }
        true
    }

    /// Hand a provisional image to the listener, leaving it pending.
    pub(crate) fn preview(&self, image: &Arc<RgbaImage>) -> bool {
        if !matches!(*self.status.lock(), ContainerStatus::Pending) {
            return false;
        }
        let listener = self.listener.lock().take();
        let Some(mut listener) = listener else {
            return false;
        };
        listener.on_event(BlurEvent::Ready {
            image: Arc::clone(image),
            immediate: true,
        });

        let mut slot = self.listener.lock();
        if matches!(*self.status.lock(), ContainerStatus::Pending) && slot.is_none() {
            *slot = Some(listener);
        }
        true
    }

    /// Mark the slot canceled. Returns `false` if it had already
    /// completed or been canceled.
    fn withdraw(&self) -> bool {
        {
            let mut status = self.status.lock();
            if !matches!(*status, ContainerStatus::Pending) {
                return false;
            }
            *status = ContainerStatus::Canceled;
        }
        self.listener.lock().take();
        true
    }
}

/// A caller's handle onto a blur request, returned immediately by
/// [`ImageBlurrer::blur`](crate::ImageBlurrer::blur).
///
/// The image appears here once the result is delivered. Dropping the
/// container does not cancel the request; call [`cancel`](Self::cancel).
pub struct BlurredImageContainer {
    slot: Arc<Slot>,
    coalescer: Weak<Mutex<CoalescerState>>,
    home: ThreadId,
}

impl BlurredImageContainer {
    pub(crate) const fn new(
        slot: Arc<Slot>,
        coalescer: Weak<Mutex<CoalescerState>>,
        home: ThreadId,
    ) -> Self {
        Self {
            slot,
            coalescer,
            home,
        }
    }

    /// The derived key this container is coalesced under.
    #[must_use]
    pub fn key(&self) -> &BlurKey {
        self.slot.key()
    }

    /// The blurred image, once delivered.
    #[must_use]
    pub fn image(&self) -> Option<Arc<RgbaImage>> {
        match &*self.slot.status.lock() {
            ContainerStatus::Ready(image) => Some(Arc::clone(image)),
            _ => None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ContainerStatus {
        self.slot.status.lock().clone()
    }

    /// Returns `true` if [`cancel`](Self::cancel) has withdrawn this
    /// container.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(*self.slot.status.lock(), ContainerStatus::Canceled)
    }

    /// Withdraw this caller's interest.
    ///
    /// The listener will not be called. If no other caller is waiting on
    /// the same key, the underlying request is canceled: the dispatcher
    /// skips it, or if already blurred, does not cache the result.
    /// Canceling a delivered or already-canceled container does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`BlurError::NotOnHomeThread`] if called off the home thread.
    pub fn cancel(&self) -> Result<(), BlurError> {
        ensure_home(self.home)?;
        if !self.slot.withdraw() {
            return Ok(());
        }
        if let Some(state) = self.coalescer.upgrade() {
            state.lock().withdraw(&self.slot);
        }
        Ok(())
    }
}

impl fmt::Debug for BlurredImageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlurredImageContainer")
            .field("key", self.slot.key())
            .field("status", &*self.slot.status.lock())
            .finish_non_exhaustive()
    }
}
