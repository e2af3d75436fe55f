use courier_log::MessageLogError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The log was used while closed.
    #[error("message log is closed")]
    Closed,
}

impl MessageLogError for Error {}
