use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use chime_core::{
    join_username, AccountInfo, LedgerError, LedgerService, Message, Notification, Transfer,
};

/// In-memory ledger for deterministic tests without network calls.
///
/// By default every accepted submission is looped back onto the notification
/// stream, the way a real ledger pushes the resulting event to subscribers.
pub struct MockLedger {
    prefix: String,
    base_uri: String,
    accounts: DashMap<String, AccountInfo>,
    connected: AtomicBool,
    connect_calls: AtomicUsize,
    notify_tx: broadcast::Sender<Notification>,
    subscriptions: parking_lot::Mutex<Vec<Vec<String>>>,
    transfers: parking_lot::Mutex<Vec<Transfer>>,
    messages: parking_lot::Mutex<Vec<Message>>,
    fulfillments: parking_lot::Mutex<Vec<(Uuid, String)>>,
    fulfillment_error: parking_lot::Mutex<Option<LedgerError>>,
    loopback: AtomicBool,
}

impl MockLedger {
    pub fn new(prefix: impl Into<String>) -> Self {
        let (notify_tx, _) = broadcast::channel(256);
        Self {
            prefix: prefix.into(),
            base_uri: "http://ledger.mock/accounts".into(),
            accounts: DashMap::new(),
            connected: AtomicBool::new(false),
            connect_calls: AtomicUsize::new(0),
            notify_tx,
            subscriptions: parking_lot::Mutex::new(Vec::new()),
            transfers: parking_lot::Mutex::new(Vec::new()),
            messages: parking_lot::Mutex::new(Vec::new()),
            fulfillments: parking_lot::Mutex::new(Vec::new()),
            fulfillment_error: parking_lot::Mutex::new(None),
            loopback: AtomicBool::new(true),
        }
    }

    /// Register a known ledger account.
    pub fn with_account(self, username: &str) -> Self {
        self.accounts.insert(
            username.to_string(),
            AccountInfo {
                name: username.to_string(),
                ledger: Some(self.base_uri.clone()),
                balance: Some("100".into()),
            },
        );
        self
    }

    /// Disable the submit-to-notification loopback.
    pub fn without_loopback(self) -> Self {
        self.loopback.store(false, Ordering::Relaxed);
        self
    }

    /// Make every fulfillment submission fail with the given error.
    pub fn reject_fulfillments_with(&self, error: LedgerError) {
        *self.fulfillment_error.lock() = Some(error);
    }

    /// Push a notification onto the stream directly.
    pub fn emit(&self, notification: Notification) {
        if self.notify_tx.send(notification).is_err() {
            tracing::trace!("mock notification dropped, no subscribers");
        }
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> Vec<Vec<String>> {
        self.subscriptions.lock().clone()
    }

    pub fn submitted_transfers(&self) -> Vec<Transfer> {
        self.transfers.lock().clone()
    }

    pub fn submitted_messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn submitted_fulfillments(&self) -> Vec<(Uuid, String)> {
        self.fulfillments.lock().clone()
    }

    fn ensure_connected(&self) -> Result<(), LedgerError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LedgerError::NotConnected)
        }
    }
}

#[async_trait]
impl LedgerService for MockLedger {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn account_uri(&self, username: &str) -> String {
        join_username(&self.base_uri, username)
    }

    async fn connect(&self) -> Result<(), LedgerError> {
        let _ = self.connect_calls.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), LedgerError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_transfer(&self, transfer: &Transfer) -> Result<(), LedgerError> {
        self.ensure_connected()?;
        transfer.validate()?;
        self.transfers.lock().push(transfer.clone());
        if self.loopback.load(Ordering::Relaxed) {
            self.emit(Notification::IncomingTransfer(transfer.clone()));
        }
        Ok(())
    }

    async fn submit_message(&self, message: &Message) -> Result<(), LedgerError> {
        self.ensure_connected()?;
        let destination = message
            .destination()
            .ok_or_else(|| LedgerError::InvalidMessage("no destination account".into()))?
            .to_string();
        self.messages.lock().push(message.clone());
        if self.loopback.load(Ordering::Relaxed) {
            // Resolve the sender the way a real ledger does: `from` carries
            // it, and the legacy `account` field mirrors it.
            let inbound = Message {
                ledger: message.ledger.clone(),
                from: message.from.clone(),
                to: Some(destination),
                account: message.from.clone(),
                data: message.data.clone(),
            };
            self.emit(Notification::IncomingMessage(inbound));
        }
        Ok(())
    }

    async fn submit_fulfillment(
        &self,
        transfer_id: Uuid,
        fulfillment: &str,
    ) -> Result<(), LedgerError> {
        self.ensure_connected()?;
        if let Some(error) = self.fulfillment_error.lock().clone() {
            return Err(error);
        }
        self.fulfillments
            .lock()
            .push((transfer_id, fulfillment.to_string()));
        Ok(())
    }

    async fn fetch_account(&self, username: &str) -> Result<AccountInfo, LedgerError> {
        self.ensure_connected()?;
        self.accounts
            .get(username)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| LedgerError::AccountNotFound {
                username: username.to_string(),
            })
    }

    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    async fn subscribe_accounts(&self, account_uris: &[String]) -> Result<(), LedgerError> {
        self.ensure_connected()?;
        self.subscriptions.lock().push(account_uris.to_vec());
        Ok(())
    }
}
