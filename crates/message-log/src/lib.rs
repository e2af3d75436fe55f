//! Abstract interface for the durable log of undelivered messages.
//!
//! The log is an append/remove store keyed by message id. Every append is
//! assigned a serial that increases monotonically, and `open` hands back
//! all surviving records in serial order so a dispatcher can rebuild its
//! queues exactly as they were.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::error::Error;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use courier_identity::Identity;
use serde::{Deserialize, Serialize};

/// Marker trait for `MessageLog` errors
pub trait MessageLogError: Debug + Error + Send + Sync + 'static {}

/// The durable form of a pending message.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PersistedMessage {
    /// Globally unique message id.
    pub message_id: String,

    /// Identity of the sending party.
    pub sender: Identity,

    /// Identity of the receiving party.
    pub receiver: Identity,

    /// Whether the sender asked to be told about retrieval.
    pub needs_receipt: bool,

    /// Opaque subject line.
    pub subject: String,

    /// Free-form attributes.
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// A trait representing a durable, replayable log of pending messages.
#[async_trait]
pub trait MessageLog: Clone + Send + Sync + 'static {
    /// The error type for log operations.
    type Error: MessageLogError;

    /// Opens the log and returns every persisted message, ascending by serial.
    async fn open(&self) -> Result<Vec<(u64, PersistedMessage)>, Self::Error>;

    /// Appends a message and returns the serial assigned to it.
    async fn append(&self, message: &PersistedMessage) -> Result<u64, Self::Error>;

    /// Removes the message with the given id. Unknown ids are ignored.
    async fn remove(&self, message_id: &str) -> Result<(), Self::Error>;

    /// Closes the log. It may be opened again afterwards.
    async fn close(&self) -> Result<(), Self::Error>;
}

/// Implement MessageLog for Arc<T> where T: MessageLog
#[async_trait]
impl<T: MessageLog> MessageLog for Arc<T> {
    type Error = T::Error;

    async fn open(&self) -> Result<Vec<(u64, PersistedMessage)>, Self::Error> {
        (**self).open().await
    }

    async fn append(&self, message: &PersistedMessage) -> Result<u64, Self::Error> {
        (**self).append(message).await
    }

    async fn remove(&self, message_id: &str) -> Result<(), Self::Error> {
        (**self).remove(message_id).await
    }

    async fn close(&self) -> Result<(), Self::Error> {
        (**self).close().await
    }
}
