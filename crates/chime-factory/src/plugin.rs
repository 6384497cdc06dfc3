use std::sync::Arc;

use tokio::sync::broadcast;

use chime_core::{LedgerError, LedgerService, Message, Notification, Transfer};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-account handle over the factory's shared ledger session.
///
/// A plugin owns exactly one account identity. It reports connected iff the
/// shared session is connected, sends with its own identity stamped on, and
/// emits only the inbound events addressed to its account.
pub struct Plugin {
    username: String,
    address: String,
    service: Arc<dyn LedgerService>,
    transfers_tx: broadcast::Sender<Transfer>,
    messages_tx: broadcast::Sender<Message>,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("username", &self.username)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    pub(crate) fn new(username: &str, service: Arc<dyn LedgerService>) -> Self {
        let (transfers_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (messages_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            address: format!("{}{}", service.prefix(), username),
            username: username.to_string(),
            service,
            transfers_tx,
            messages_tx,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Ledger address of this plugin's account (`prefix + username`).
    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn connect(&self) -> Result<(), LedgerError> {
        self.service.connect().await
    }

    pub async fn disconnect(&self) -> Result<(), LedgerError> {
        self.service.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.service.is_connected()
    }

    /// Submit a transfer from this account. The destination must live under
    /// this ledger's prefix; the sender identity is stamped before submission.
    pub async fn send_transfer(&self, mut transfer: Transfer) -> Result<(), LedgerError> {
        if !transfer.account.starts_with(self.service.prefix()) {
            return Err(LedgerError::InvalidTransfer(format!(
                "destination {} is not under ledger prefix {}",
                transfer.account,
                self.service.prefix()
            )));
        }
        transfer.from = Some(self.address.clone());
        self.service.submit_transfer(&transfer).await
    }

    /// Submit a message from this account, same addressing rules as
    /// `send_transfer`.
    pub async fn send_message(&self, mut message: Message) -> Result<(), LedgerError> {
        let destination = message
            .destination()
            .ok_or_else(|| LedgerError::InvalidMessage("no destination account".into()))?;
        if !destination.starts_with(self.service.prefix()) {
            return Err(LedgerError::InvalidMessage(format!(
                "destination {} is not under ledger prefix {}",
                destination,
                self.service.prefix()
            )));
        }
        if message.ledger.is_empty() {
            message.ledger = self.service.prefix().to_string();
        }
        message.from = Some(self.address.clone());
        self.service.submit_message(&message).await
    }

    /// Inbound transfers addressed to this account, in arrival order.
    pub fn subscribe_transfers(&self) -> broadcast::Receiver<Transfer> {
        self.transfers_tx.subscribe()
    }

    /// Inbound messages addressed to this account, in arrival order.
    pub fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.messages_tx.subscribe()
    }

    /// Called by the router with an event already matched to this account.
    /// Payloads are forwarded unmodified; a message without a resolvable
    /// sender indicates a routing fault upstream and is dropped loudly.
    pub(crate) fn deliver(&self, notification: &Notification) {
        match notification {
            Notification::IncomingTransfer(transfer) => {
                if self.transfers_tx.send(transfer.clone()).is_err() {
                    tracing::trace!(account = %self.address, "incoming transfer dropped, no subscribers");
                }
            }
            Notification::IncomingMessage(message) => {
                if message.sender().is_none() {
                    tracing::error!(
                        account = %self.address,
                        "incoming message has no sender in either account or from field, dropping"
                    );
                    return;
                }
                if self.messages_tx.send(message.clone()).is_err() {
                    tracing::trace!(account = %self.address, "incoming message dropped, no subscribers");
                }
            }
        }
    }
}
