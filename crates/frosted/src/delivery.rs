//! Hand-off of finished responses from the dispatcher to the home thread.
//!
//! The dispatcher never calls listeners itself. It posts a [`Delivery`]
//! onto a channel; the home thread receives it and runs it, which
//! re-checks cancellation and finishes the request.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::error::BlurError;
use crate::request::BlurRequest;
use crate::response::BlurResponse;

/// A response waiting to be run on the home thread.
#[derive(Debug)]
pub struct Delivery {
    request: Arc<BlurRequest>,
    response: BlurResponse,
}

impl Delivery {
    /// The request this delivery belongs to.
    #[must_use]
    pub const fn request(&self) -> &Arc<BlurRequest> {
        &self.request
    }

    /// Run the delivery.
    ///
    /// A request canceled since the response was posted is finished
    /// without calling `handler`. Otherwise `handler` receives the
    /// response, after which the request is finished unless the
    /// response is intermediate.
    pub fn run(self, handler: impl FnOnce(&Arc<BlurRequest>, BlurResponse)) {
        let Self { request, response } = self;

        if request.is_canceled() {
            request.finish("canceled-at-delivery");
            return;
        }

        let intermediate = response.is_intermediate();
        handler(&request, response);

        if intermediate {
            request.mark("intermediate-response");
        } else {
            request.finish("done");
        }
    }
}

/// Posts responses to the home thread.
#[derive(Debug, Clone)]
pub struct ResponseDelivery {
    tx: Sender<Delivery>,
}

impl ResponseDelivery {
    /// Create a delivery handle and the receiver the home thread drains.
    #[must_use]
    pub fn channel() -> (Self, Receiver<Delivery>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { tx }, rx)
    }

    /// Post a response for `request`.
    pub fn post_response(&self, request: &Arc<BlurRequest>, response: BlurResponse) {
        request.mark_delivered();
        request.mark("post-response");
        self.send(request, response);
    }

    /// Post an error for `request`.
    pub fn post_error(&self, request: &Arc<BlurRequest>, error: BlurError) {
        request.mark("post-error");
        self.send(request, BlurResponse::error(error));
    }

    fn send(&self, request: &Arc<BlurRequest>, response: BlurResponse) {
        let delivery = Delivery {
            request: Arc::clone(request),
            response,
        };
        if let Err(err) = self.tx.send(delivery) {
            debug!(key = %request.key(), "home thread gone, dropping response");
            err.into_inner().request.finish("delivery-receiver-gone");
        }
    }
}
