//! In-memory (single process) implementation of the message log for local
//! development and tests.
//!
//! Clones share state, so a log that is closed and reopened through any
//! clone replays what was appended before, which is enough to exercise
//! recovery without touching the disk.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use courier_log::{MessageLog, PersistedMessage};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    /// serial -> record
    entries: BTreeMap<u64, PersistedMessage>,
    /// message id -> serial
    index: HashMap<String, u64>,
    last_serial: u64,
    open: bool,
}

/// In-memory message log.
#[derive(Clone, Debug, Default)]
pub struct MemoryMessageLog {
    state: Arc<RwLock<State>>,
}

impl MemoryMessageLog {
    /// Creates a new, empty `MemoryMessageLog`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Returns true if no records are held.
    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }
}

#[async_trait]
impl MessageLog for MemoryMessageLog {
    type Error = Error;

    async fn open(&self) -> Result<Vec<(u64, PersistedMessage)>, Self::Error> {
        let mut state = self.state.write().await;
        state.open = true;

        debug!("opened memory log with {} records", state.entries.len());

        Ok(state
            .entries
            .iter()
            .map(|(&serial, message)| (serial, message.clone()))
            .collect())
    }

    async fn append(&self, message: &PersistedMessage) -> Result<u64, Self::Error> {
        let mut state = self.state.write().await;
        if !state.open {
            return Err(Error::Closed);
        }

        state.last_serial += 1;
        let serial = state.last_serial;

        if let Some(previous) = state.index.insert(message.message_id.clone(), serial) {
            state.entries.remove(&previous);
        }
        state.entries.insert(serial, message.clone());

        Ok(serial)
    }

    async fn remove(&self, message_id: &str) -> Result<(), Self::Error> {
        let mut state = self.state.write().await;
        if !state.open {
            return Err(Error::Closed);
        }

        if let Some(serial) = state.index.remove(message_id) {
            state.entries.remove(&serial);
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), Self::Error> {
        self.state.write().await.open = false;
        Ok(())
    }
}
