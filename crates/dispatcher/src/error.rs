use crate::Envelope;

use std::sync::Arc;

use thiserror::Error;

/// Convenience alias for results in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The credential could not be resolved to an identity.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The message log could not be opened or replayed, or the dispatcher
    /// was initialized twice.
    #[error("initialization failed: {0}")]
    Initialization(String),

    /// The dispatcher is not initialized, or the handle predates a reset.
    #[error("message dispatcher was not initialized properly")]
    NotInitialized,

    /// The message log rejected an append or a removal. The in-memory
    /// change has already been applied.
    #[error("storage error for message {}: {reason}", .message.id())]
    StorageIo {
        /// The message whose durable state is now out of date.
        message: Arc<Envelope>,

        /// Description of the underlying log failure.
        reason: String,
    },
}
