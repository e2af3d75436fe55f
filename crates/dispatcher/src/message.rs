use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use courier_identity::Identity;
use courier_log::PersistedMessage;
use uuid::Uuid;

/// A message being prepared for sending.
///
/// The subject and parameters may be changed freely until the message is
/// handed to [`Sender::send`](crate::Sender::send), which freezes it into an
/// [`Envelope`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    subject: String,
    params: HashMap<String, String>,
}

impl Message {
    /// Creates a message with the given subject and no parameters.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            params: HashMap::new(),
        }
    }

    /// Adds a parameter, builder style.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Adds or replaces a parameter, returning the previous value.
    pub fn put_param(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.params.insert(key.into(), value.into())
    }

    /// Replaces the subject.
    pub fn set_subject(&mut self, subject: impl Into<String>) {
        self.subject = subject.into();
    }

    /// The subject line.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// The value of a single parameter.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// All parameters.
    #[must_use]
    pub const fn params(&self) -> &HashMap<String, String> {
        &self.params
    }
}

/// A dispatched message: the frozen [`Message`] plus its routing metadata.
///
/// Envelopes refer to their sender and receiver by identity only. The
/// owning objects are looked up through the dispatcher's registry.
#[derive(Debug)]
pub struct Envelope {
    id: String,
    sender: Identity,
    receiver: Identity,
    needs_receipt: bool,
    message: Message,
    serial: AtomicU64,
    retired: AtomicBool,
}

impl Envelope {
    pub(crate) fn new(
        message: Message,
        sender: Identity,
        receiver: Identity,
        needs_receipt: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            receiver,
            needs_receipt,
            message,
            serial: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn restore(serial: u64, persisted: PersistedMessage) -> Self {
        let PersistedMessage {
            message_id,
            sender,
            receiver,
            needs_receipt,
            subject,
            params,
        } = persisted;

        Self {
            id: message_id,
            sender,
            receiver,
            needs_receipt,
            message: Message { subject, params },
            serial: AtomicU64::new(serial),
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn to_persisted(&self) -> PersistedMessage {
        PersistedMessage {
            message_id: self.id.clone(),
            sender: self.sender,
            receiver: self.receiver,
            needs_receipt: self.needs_receipt,
            subject: self.message.subject.clone(),
            params: self.message.params.clone(),
        }
    }

    /// The unique message id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity of the sender.
    #[must_use]
    pub const fn sender(&self) -> Identity {
        self.sender
    }

    /// Identity of the receiver.
    #[must_use]
    pub const fn receiver(&self) -> Identity {
        self.receiver
    }

    /// Whether the sender asked to be notified on retrieval.
    #[must_use]
    pub const fn needs_receipt(&self) -> bool {
        self.needs_receipt
    }

    /// The frozen message.
    #[must_use]
    pub const fn message(&self) -> &Message {
        &self.message
    }

    /// Shorthand for `message().subject()`.
    #[must_use]
    pub fn subject(&self) -> &str {
        self.message.subject()
    }

    /// Shorthand for `message().param(key)`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.message.param(key)
    }

    /// Serial assigned by the message log, or zero if never persisted.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial.load(Ordering::SeqCst)
    }

    pub(crate) fn set_serial(&self, serial: u64) {
        self.serial.store(serial, Ordering::SeqCst);
    }

    // Set once the message leaves the receiver. Paired with the check in
    // `Registry::persist` so a record appended after its removal is dropped.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_params() {
        let mut message = Message::new("hello").with_param("a", "1");

        assert_eq!(message.put_param("a", "2"), Some("1".to_string()));
        assert_eq!(message.put_param("b", "3"), None);
        assert_eq!(message.param("a"), Some("2"));
        assert_eq!(message.param("missing"), None);
        assert_eq!(message.params().len(), 2);

        message.set_subject("bye");
        assert_eq!(message.subject(), "bye");
    }

    #[test]
    fn test_envelope_ids_are_unique() {
        let a = Envelope::new(Message::new("x"), Identity::new(1), Identity::new(2), false);
        let b = Envelope::new(Message::new("x"), Identity::new(1), Identity::new(2), false);

        assert_ne!(a.id(), b.id());
        assert_eq!(a.serial(), 0);
    }

    #[test]
    fn test_persisted_form_restores_identically() {
        let original = Envelope::new(
            Message::new("subject").with_param("k", "v"),
            Identity::new(7),
            Identity::new(8),
            true,
        );

        let restored = Envelope::restore(42, original.to_persisted());

        assert_eq!(restored.id(), original.id());
        assert_eq!(restored.sender(), Identity::new(7));
        assert_eq!(restored.receiver(), Identity::new(8));
        assert!(restored.needs_receipt());
        assert_eq!(restored.message(), original.message());
        assert_eq!(restored.serial(), 42);
        assert!(!restored.is_retired());
    }
}
