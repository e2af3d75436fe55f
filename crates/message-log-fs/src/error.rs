use std::path::PathBuf;

use courier_log::MessageLogError;
use thiserror::Error;

/// Errors that can occur in this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The log was used while closed.
    #[error("message log is closed")]
    Closed,

    /// A record on disk could not be decoded.
    #[error("deserialization error in {0}: {1}")]
    Deserialize(PathBuf, String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),

    /// A record could not be encoded.
    #[error("serialization error: {0}")]
    Serialize(String),
}

impl MessageLogError for Error {}
