use crate::Envelope;
use crate::error::{Error, Result};
use crate::registry::Registry;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use courier_identity::Identity;
use courier_log::MessageLog;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Arrival-ordered queue plus id index. Both are only ever touched together
/// under the receiver's lock, so an id is in `index` iff it is in `queue`.
#[derive(Default)]
struct Inbox {
    queue: VecDeque<Arc<Envelope>>,
    index: HashMap<String, Arc<Envelope>>,
}

impl Inbox {
    fn push(&mut self, envelope: Arc<Envelope>) {
        self.index
            .insert(envelope.id().to_string(), Arc::clone(&envelope));
        self.queue.push_back(envelope);
    }

    fn pop_front(&mut self) -> Option<Arc<Envelope>> {
        let envelope = self.queue.pop_front()?;
        self.index.remove(envelope.id());
        Some(envelope)
    }

    fn remove(&mut self, message_id: &str) -> Option<Arc<Envelope>> {
        let envelope = self.index.remove(message_id)?;
        if let Some(position) = self
            .queue
            .iter()
            .position(|queued| queued.id() == message_id)
        {
            self.queue.remove(position);
        }
        Some(envelope)
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.index.is_empty()
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }
}

/// The receiving side of one identity.
///
/// Messages are delivered by [`pull_next`](Self::pull_next) in exactly the
/// order they were sent, across all senders, or picked out directly with
/// [`pull`](Self::pull).
pub struct Receiver<L>
where
    L: MessageLog,
{
    identity: Identity,
    generation: u64,
    inbox: Mutex<Inbox>,
    // Held from inbox push until the log append returns, so log serials
    // follow inbox order. Pulls never take it.
    enqueue_lock: AsyncMutex<()>,
    registry: Weak<Registry<L>>,
}

impl<L> Receiver<L>
where
    L: MessageLog,
{
    pub(crate) fn new(identity: Identity, generation: u64, registry: Weak<Registry<L>>) -> Self {
        Self {
            identity,
            generation,
            inbox: Mutex::new(Inbox::default()),
            enqueue_lock: AsyncMutex::new(()),
            registry,
        }
    }

    fn registry(&self) -> Result<Arc<Registry<L>>> {
        let registry = self.registry.upgrade().ok_or(Error::NotInitialized)?;
        registry.ensure_current(self.generation)?;
        Ok(registry)
    }

    /// The identity this receiver acts for.
    #[must_use]
    pub const fn identity(&self) -> Identity {
        self.identity
    }

    /// Number of messages waiting.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inbox.lock().queue.len()
    }

    /// Ids of the waiting messages, in delivery order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.inbox
            .lock()
            .queue
            .iter()
            .map(|envelope| envelope.id().to_string())
            .collect()
    }

    pub(crate) async fn enqueue(
        &self,
        registry: &Registry<L>,
        envelope: Arc<Envelope>,
    ) -> Result<()> {
        let _enqueue = self.enqueue_lock.lock().await;

        self.inbox.lock().push(Arc::clone(&envelope));

        registry.persist(&envelope).await
    }

    /// Re-inserts a replayed message without persisting it again.
    pub(crate) fn restore(&self, envelope: Arc<Envelope>) {
        self.inbox.lock().push(envelope);
    }

    /// Removes and returns the oldest waiting message, or `None` if there is
    /// none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] for a stale handle and
    /// [`Error::StorageIo`] if the message log could not drop the record.
    /// The storage error carries the retrieved message.
    pub async fn pull_next(&self) -> Result<Option<Arc<Envelope>>> {
        let registry = self.registry()?;

        let envelope = self.inbox.lock().pop_front();
        match envelope {
            Some(envelope) => self.retrieved(&registry, envelope).await.map(Some),
            None => Ok(None),
        }
    }

    /// Removes and returns the message with the given id, or `None` if it is
    /// not waiting here. The remaining messages keep their order.
    ///
    /// # Errors
    ///
    /// Same as [`pull_next`](Self::pull_next).
    pub async fn pull(&self, message_id: &str) -> Result<Option<Arc<Envelope>>> {
        let registry = self.registry()?;

        let envelope = self.inbox.lock().remove(message_id);
        match envelope {
            Some(envelope) => self.retrieved(&registry, envelope).await.map(Some),
            None => Ok(None),
        }
    }

    async fn retrieved(
        &self,
        registry: &Registry<L>,
        envelope: Arc<Envelope>,
    ) -> Result<Arc<Envelope>> {
        debug!(
            message_id = envelope.id(),
            receiver = %self.identity,
            sender = %envelope.sender(),
            "retrieved message"
        );

        if let Some(sender) = registry.find_sender(envelope.sender()) {
            sender.notify_retrieved(&envelope);
        }

        registry.forget(&envelope).await?;

        Ok(envelope)
    }

    /// Removes a message on behalf of its sender, without retrieval side
    /// effects.
    pub(crate) fn withdraw(&self, message_id: &str) -> Option<Arc<Envelope>> {
        self.inbox.lock().remove(message_id)
    }

    /// Clears the inbox. Returns true if it was already empty.
    pub(crate) fn drain(&self) -> bool {
        let mut inbox = self.inbox.lock();
        let empty = inbox.is_empty();
        inbox.clear();
        empty
    }
}

impl<L> std::fmt::Debug for Receiver<L>
where
    L: MessageLog,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("identity", &self.identity)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::Message;

    fn envelope(subject: &str) -> Arc<Envelope> {
        Arc::new(Envelope::new(
            Message::new(subject),
            Identity::new(1),
            Identity::new(2),
            false,
        ))
    }

    #[test]
    fn test_inbox_pop_keeps_index_in_step() {
        let mut inbox = Inbox::default();
        let first = envelope("first");
        let second = envelope("second");

        inbox.push(Arc::clone(&first));
        inbox.push(Arc::clone(&second));

        assert_eq!(inbox.pop_front().unwrap().id(), first.id());
        assert!(!inbox.index.contains_key(first.id()));
        assert!(inbox.index.contains_key(second.id()));
        assert_eq!(inbox.queue.len(), inbox.index.len());
    }

    #[test]
    fn test_inbox_remove_preserves_order() {
        let mut inbox = Inbox::default();
        let envelopes: Vec<_> = (0..5).map(|i| envelope(&format!("s{i}"))).collect();
        for envelope in &envelopes {
            inbox.push(Arc::clone(envelope));
        }

        assert!(inbox.remove(envelopes[2].id()).is_some());
        assert!(inbox.remove(envelopes[2].id()).is_none());

        let subjects: Vec<_> = inbox.queue.iter().map(|e| e.subject().to_string()).collect();
        assert_eq!(subjects, vec!["s0", "s1", "s3", "s4"]);
        assert_eq!(inbox.queue.len(), inbox.index.len());
    }

    #[test]
    fn test_inbox_remove_unknown() {
        let mut inbox = Inbox::default();
        inbox.push(envelope("only"));

        assert!(inbox.remove("nope").is_none());
        assert_eq!(inbox.queue.len(), 1);
    }
}
