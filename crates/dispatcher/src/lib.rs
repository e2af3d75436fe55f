//! In-process message dispatch core.
//!
//! Senders deposit messages addressed to a receiver identity, receivers pull
//! them in arrival order or by id, and senders can ask to be told when a
//! message has been retrieved. Pending messages can be mirrored to a durable
//! [`MessageLog`] and are replayed from it on [`Dispatcher::initialize`].
//!
//! Every [`Sender`] and [`Receiver`] synchronizes itself; there is no global
//! lock. A retrieval and a withdrawal of the same message are decided by
//! whichever removes it from the receiver first.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod message;
mod receiver;
mod registry;
mod sender;

pub use error::{Error, Result};
pub use message::{Envelope, Message};
pub use receiver::Receiver;
pub use sender::{ReceptionHandler, Sender};

pub use courier_identity::{Identity, IdentityResolver};
pub use courier_log::{MessageLog, PersistedMessage};

use registry::Registry;

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

/// Options for initializing a `Dispatcher`.
#[derive(Clone, Debug)]
pub struct DispatcherOptions<R, L>
where
    R: IdentityResolver,
    L: MessageLog,
{
    /// Verifies credentials passed to the resolve calls.
    pub identity_resolver: R,

    /// Durable log of pending messages. Nothing is persisted when `None`.
    pub message_log: Option<L>,
}

/// Registry of senders and receivers, keyed by identity.
///
/// A dispatcher starts uninitialized. [`initialize`](Self::initialize)
/// installs the identity resolver and replays the message log;
/// [`reset`](Self::reset) tears everything down again so the dispatcher can
/// be re-initialized.
pub struct Dispatcher<R, L>
where
    R: IdentityResolver,
    L: MessageLog,
{
    registry: Arc<Registry<L>>,
    resolver: RwLock<Option<R>>,
}

impl<R, L> Dispatcher<R, L>
where
    R: IdentityResolver,
    L: MessageLog,
{
    /// Creates an uninitialized dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            resolver: RwLock::new(None),
        }
    }

    /// Installs the identity resolver and, if a message log is configured,
    /// opens it and replays every pending message in the order it was sent.
    ///
    /// Replay uses the identities stored in the log directly; credentials
    /// are not re-validated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Initialization`] if the dispatcher is already
    /// initialized or the log cannot be opened.
    pub async fn initialize(
        &self,
        DispatcherOptions {
            identity_resolver,
            message_log,
        }: DispatcherOptions<R, L>,
    ) -> Result<()> {
        let mut resolver = self.resolver.write().await;
        if resolver.is_some() {
            return Err(Error::Initialization(
                "message dispatcher is already initialized".to_string(),
            ));
        }

        if let Some(log) = &message_log {
            let records = log
                .open()
                .await
                .map_err(|e| Error::Initialization(e.to_string()))?;

            self.registry.recover(records);
        }

        info!(
            persistent = message_log.is_some(),
            "message dispatcher initialized"
        );

        self.registry.activate(message_log);
        *resolver = Some(identity_resolver);

        Ok(())
    }

    /// Returns true between a successful `initialize` and the next `reset`.
    pub async fn is_initialized(&self) -> bool {
        self.resolver.read().await.is_some()
    }

    /// Resolves `credential` and returns the sender for its identity,
    /// creating it on first use. A supplied `handler` replaces any handler
    /// attached earlier.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize` and
    /// [`Error::Authentication`] if the credential is rejected.
    pub async fn resolve_sender(
        &self,
        credential: &str,
        handler: Option<Arc<dyn ReceptionHandler>>,
    ) -> Result<Arc<Sender<L>>> {
        let resolver = self.resolver.read().await;
        let identity = Self::authenticate(resolver.as_ref(), credential).await?;

        let sender = self.registry.sender(identity);
        if let Some(handler) = handler {
            sender.set_handler(handler);
        }

        Ok(sender)
    }

    /// Resolves `credential` and returns the receiver for its identity,
    /// creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `initialize` and
    /// [`Error::Authentication`] if the credential is rejected.
    pub async fn resolve_receiver(&self, credential: &str) -> Result<Arc<Receiver<L>>> {
        let resolver = self.resolver.read().await;
        let identity = Self::authenticate(resolver.as_ref(), credential).await?;

        Ok(self.registry.receiver(identity))
    }

    async fn authenticate(resolver: Option<&R>, credential: &str) -> Result<Identity> {
        resolver
            .ok_or(Error::NotInitialized)?
            .resolve(credential)
            .await
            .map_err(|e| Error::Authentication(e.to_string()))
    }

    /// Drops every sender and receiver, closes the message log and returns
    /// the dispatcher to the uninitialized state.
    ///
    /// Returns true if no sender or receiver had pending messages, which
    /// makes this usable as a leak check. Handles obtained before the reset
    /// stop working.
    pub async fn reset(&self) -> bool {
        let mut resolver = self.resolver.write().await;

        let (log, clean) = self.registry.clear();
        if let Some(log) = log {
            if let Err(e) = log.close().await {
                warn!("failed to close message log: {e}");
            }
        }

        *resolver = None;

        info!(clean, "message dispatcher reset");

        clean
    }
}

impl<R, L> Default for Dispatcher<R, L>
where
    R: IdentityResolver,
    L: MessageLog,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R, L> std::fmt::Debug for Dispatcher<R, L>
where
    R: IdentityResolver,
    L: MessageLog,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("resolver_type", &std::any::type_name::<R>())
            .field("log_type", &std::any::type_name::<L>())
            .finish_non_exhaustive()
    }
}
