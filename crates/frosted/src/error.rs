//! Error types for the blur pipeline.

use frosted_kernel::KernelError;

/// Errors surfaced by the blur pipeline.
///
/// Transform failures (`Transform`, `Panicked`) are delivered to every
/// listener attached to the failing key. The remaining variants are
/// returned directly from the call that caused them and indicate an
/// integration bug or a startup problem.
///
/// Cancellation is not an error and has no variant here: a canceled
/// request simply produces no delivery.
#[derive(Debug, thiserror::Error)]
pub enum BlurError {
    /// The blur kernel could not produce a result.
    #[error("blur transform failed: {0}")]
    Transform(#[from] KernelError),

    /// The blur kernel panicked. Only the offending request fails.
    #[error("blur transform panicked: {0}")]
    Panicked(String),

    /// A home-thread-only API was called from another thread.
    #[error("image blurrer must be invoked from its home thread")]
    NotOnHomeThread,

    /// A request's sequence number was read before the queue assigned it.
    #[error("sequence number read before it was assigned")]
    SequenceUnassigned,

    /// The request was already added to a queue.
    #[error("blur request already has sequence number {0}")]
    AlreadyQueued(u64),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid blurrer configuration: {0}")]
    InvalidConfig(String),

    /// The dispatcher thread could not be started.
    #[error("failed to spawn blur dispatcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}
