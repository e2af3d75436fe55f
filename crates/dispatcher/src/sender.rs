use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::{Envelope, Message};

use std::sync::{Arc, Weak};

use courier_identity::Identity;
use courier_log::MessageLog;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tracing::debug;

/// Receives reception events for messages sent with `needs_receipt`.
///
/// Handlers run inline on the retrieving receiver's call and must return
/// promptly. Closures taking `&Envelope` implement this trait.
pub trait ReceptionHandler: Send + Sync + 'static {
    /// Called once the receiver has retrieved `envelope`.
    fn on_reception(&self, envelope: &Envelope);
}

impl<F> ReceptionHandler for F
where
    F: Fn(&Envelope) + Send + Sync + 'static,
{
    fn on_reception(&self, envelope: &Envelope) {
        self(envelope);
    }
}

/// The sending side of one identity.
///
/// Tracks every message it has sent that is still waiting at a receiver.
pub struct Sender<L>
where
    L: MessageLog,
{
    identity: Identity,
    generation: u64,
    handler: RwLock<Option<Arc<dyn ReceptionHandler>>>,
    pending: DashMap<String, Arc<Envelope>>,
    registry: Weak<Registry<L>>,
}

impl<L> Sender<L>
where
    L: MessageLog,
{
    pub(crate) fn new(identity: Identity, generation: u64, registry: Weak<Registry<L>>) -> Self {
        Self {
            identity,
            generation,
            handler: RwLock::new(None),
            pending: DashMap::new(),
            registry,
        }
    }

    fn registry(&self) -> Result<Arc<Registry<L>>> {
        let registry = self.registry.upgrade().ok_or(Error::NotInitialized)?;
        registry.ensure_current(self.generation)?;
        Ok(registry)
    }

    /// The identity this sender acts for.
    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    /// Number of sent messages not yet retrieved or withdrawn.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn set_handler(&self, handler: Arc<dyn ReceptionHandler>) {
        *self.handler.write() = Some(handler);
    }

    /// Sends `message` to `receiver` and returns the generated message id.
    ///
    /// The receiver is created if it has never been seen before. When
    /// `needs_receipt` is set, this sender's reception handler fires once the
    /// message is retrieved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the dispatcher is not running or
    /// has been reset since this handle was created, and
    /// [`Error::StorageIo`] if the message log rejected the append. In the
    /// latter case the message has still been delivered to the receiver.
    pub async fn send(
        &self,
        message: Message,
        receiver: impl Into<Identity> + Send,
        needs_receipt: bool,
    ) -> Result<String> {
        let registry = self.registry()?;

        let envelope = Arc::new(Envelope::new(
            message,
            self.identity,
            receiver.into(),
            needs_receipt,
        ));
        let message_id = envelope.id().to_string();

        self.pending
            .insert(message_id.clone(), Arc::clone(&envelope));

        debug!(
            message_id,
            sender = %self.identity,
            receiver = %envelope.receiver(),
            needs_receipt,
            "sending message"
        );

        registry
            .receiver(envelope.receiver())
            .enqueue(&registry, envelope)
            .await?;

        Ok(message_id)
    }

    /// Returns true while the message is waiting to be retrieved.
    ///
    /// This is a snapshot: a concurrent retrieval may complete right after.
    #[must_use]
    pub fn is_awaiting(&self, message_id: &str) -> bool {
        self.pending.contains_key(message_id)
    }

    /// Takes a pending message back from its receiver.
    ///
    /// Returns `false` if the message was already retrieved, already
    /// withdrawn, or never sent by this sender. If a retrieval races with
    /// the withdrawal, whichever removes the message from the receiver first
    /// wins and the other observes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] for a stale handle and
    /// [`Error::StorageIo`] if the message log could not drop the record.
    pub async fn withdraw(&self, message_id: &str) -> Result<bool> {
        let registry = self.registry()?;

        let Some(receiver) = self
            .pending
            .get(message_id)
            .map(|envelope| envelope.receiver())
        else {
            return Ok(false);
        };

        let Some(envelope) = registry.receiver(receiver).withdraw(message_id) else {
            return Ok(false);
        };

        self.pending.remove(message_id);

        debug!(message_id, sender = %self.identity, "withdrew message");

        registry.forget(&envelope).await?;

        Ok(true)
    }

    /// Called by the receiver that retrieved `envelope`.
    pub(crate) fn notify_retrieved(&self, envelope: &Envelope) {
        if self.pending.remove(envelope.id()).is_none() || !envelope.needs_receipt() {
            return;
        }

        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler.on_reception(envelope);
        }
    }

    /// Records a replayed message as pending. Returns false if the id is
    /// already pending.
    pub(crate) fn track(&self, envelope: Arc<Envelope>) -> bool {
        match self.pending.entry(envelope.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(envelope);
                true
            }
        }
    }

    /// Clears the pending set. Returns true if it was already empty.
    pub(crate) fn drain(&self) -> bool {
        let empty = self.pending.is_empty();
        self.pending.clear();
        empty
    }
}

impl<L> std::fmt::Debug for Sender<L>
where
    L: MessageLog,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("identity", &self.identity)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
