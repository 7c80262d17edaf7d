//! Outcome of a blur request.

use std::sync::Arc;

use frosted_kernel::RgbaImage;

use crate::error::BlurError;

/// The result of processing one [`BlurRequest`](crate::BlurRequest).
///
/// Exactly one of a blurred image or an error. Both are shared so a
/// single response can be handed to every listener coalesced onto the
/// request without copying pixels.
#[derive(Debug, Clone)]
pub struct BlurResponse {
    result: Result<Arc<RgbaImage>, Arc<BlurError>>,
    intermediate: bool,
}

impl BlurResponse {
    /// A successful, final response.
    #[must_use]
    pub const fn success(image: Arc<RgbaImage>) -> Self {
        Self {
            result: Ok(image),
            intermediate: false,
        }
    }

    /// A failed response.
    #[must_use]
    pub fn error(error: BlurError) -> Self {
        Self {
            result: Err(Arc::new(error)),
            intermediate: false,
        }
    }

    /// A provisional response. Delivering it does not finish the
    /// request; a final response is expected to follow.
    #[must_use]
    pub const fn intermediate(image: Arc<RgbaImage>) -> Self {
        Self {
            result: Ok(image),
            intermediate: true,
        }
    }

    /// Returns `true` if the response carries an image.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns `true` for provisional responses.
    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.intermediate
    }

    /// Borrow the result.
    #[must_use]
    pub const fn result(&self) -> &Result<Arc<RgbaImage>, Arc<BlurError>> {
        &self.result
    }

    /// Consume the response, yielding its result.
    #[must_use]
    pub fn into_result(self) -> Result<Arc<RgbaImage>, Arc<BlurError>> {
        self.result
    }
}
