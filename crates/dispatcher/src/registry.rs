use crate::error::{Error, Result};
use crate::{Envelope, Receiver, Sender};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use courier_identity::Identity;
use courier_log::{MessageLog, PersistedMessage};
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

/// Identity → sender/receiver maps shared by a dispatcher and every handle
/// it gives out.
///
/// Each reset starts a new generation. Handles remember the generation they
/// were created in and stop working once it is over.
pub(crate) struct Registry<L>
where
    L: MessageLog,
{
    active: AtomicBool,
    generation: AtomicU64,
    log: RwLock<Option<L>>,
    receivers: DashMap<Identity, Arc<Receiver<L>>>,
    senders: DashMap<Identity, Arc<Sender<L>>>,
}

impl<L> Registry<L>
where
    L: MessageLog,
{
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            log: RwLock::new(None),
            receivers: DashMap::new(),
            senders: DashMap::new(),
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Fails unless the registry is active and still in `generation`.
    pub fn ensure_current(&self, generation: u64) -> Result<()> {
        if self.active.load(Ordering::SeqCst) && self.generation() == generation {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Returns the sender for `identity`, creating it on first use.
    pub fn sender(self: &Arc<Self>, identity: Identity) -> Arc<Sender<L>> {
        let sender = self.senders.entry(identity).or_insert_with(|| {
            Arc::new(Sender::new(
                identity,
                self.generation(),
                Arc::downgrade(self),
            ))
        });
        Arc::clone(sender.value())
    }

    /// Returns the receiver for `identity`, creating it on first use.
    pub fn receiver(self: &Arc<Self>, identity: Identity) -> Arc<Receiver<L>> {
        let receiver = self.receivers.entry(identity).or_insert_with(|| {
            Arc::new(Receiver::new(
                identity,
                self.generation(),
                Arc::downgrade(self),
            ))
        });
        Arc::clone(receiver.value())
    }

    pub fn find_sender(&self, identity: Identity) -> Option<Arc<Sender<L>>> {
        self.senders
            .get(&identity)
            .map(|sender| Arc::clone(sender.value()))
    }

    /// Rebuilds pending state from replayed log records, bypassing identity
    /// resolution. Records are applied in serial order; a record whose id is
    /// already pending is skipped.
    pub fn recover(self: &Arc<Self>, mut records: Vec<(u64, PersistedMessage)>) -> usize {
        records.sort_by_key(|(serial, _)| *serial);

        let mut recovered = 0;
        for (serial, record) in records {
            let envelope = Arc::new(Envelope::restore(serial, record));

            let sender = self.sender(envelope.sender());
            if !sender.track(Arc::clone(&envelope)) {
                warn!(
                    message_id = envelope.id(),
                    serial, "skipping duplicate message in log"
                );
                continue;
            }

            self.receiver(envelope.receiver()).restore(envelope);
            recovered += 1;
        }

        info!(
            recovered,
            senders = self.senders.len(),
            receivers = self.receivers.len(),
            "recovered pending messages from log"
        );

        recovered
    }

    /// Opens the registry for business with the given log.
    pub fn activate(&self, log: Option<L>) {
        *self.log.write() = log;
        self.active.store(true, Ordering::SeqCst);
    }

    /// Drains every sender and receiver, empties both maps and starts a new
    /// generation. Returns the detached log, if any, and whether everything
    /// was already empty.
    pub fn clear(&self) -> (Option<L>, bool) {
        self.active.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);

        let senders_clean = self
            .senders
            .iter()
            .fold(true, |clean, sender| sender.drain() && clean);
        let receivers_clean = self
            .receivers
            .iter()
            .fold(true, |clean, receiver| receiver.drain() && clean);

        self.senders.clear();
        self.receivers.clear();

        (self.log.write().take(), senders_clean && receivers_clean)
    }

    fn current_log(&self) -> Option<L> {
        self.log.read().clone()
    }

    /// Appends a freshly enqueued message to the log, if one is configured.
    pub async fn persist(&self, envelope: &Arc<Envelope>) -> Result<()> {
        let Some(log) = self.current_log() else {
            return Ok(());
        };

        let serial = log
            .append(&envelope.to_persisted())
            .await
            .map_err(|e| storage_error(envelope, &e))?;
        envelope.set_serial(serial);

        // Retrieved or withdrawn while the append was in flight
        if envelope.is_retired() {
            log.remove(envelope.id())
                .await
                .map_err(|e| storage_error(envelope, &e))?;
        }

        Ok(())
    }

    /// Removes a retrieved or withdrawn message from the log, if one is
    /// configured.
    pub async fn forget(&self, envelope: &Arc<Envelope>) -> Result<()> {
        envelope.retire();

        let Some(log) = self.current_log() else {
            return Ok(());
        };

        log.remove(envelope.id())
            .await
            .map_err(|e| storage_error(envelope, &e))
    }
}

fn storage_error<E: std::error::Error>(envelope: &Arc<Envelope>, error: &E) -> Error {
    warn!(message_id = envelope.id(), "message log error: {error}");

    Error::StorageIo {
        message: Arc::clone(envelope),
        reason: error.to_string(),
    }
}

