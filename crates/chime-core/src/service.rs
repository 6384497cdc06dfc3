use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::LedgerError;
use crate::message::Message;
use crate::notify::Notification;
use crate::transfer::Transfer;

/// Account metadata returned by the ledger's account resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
}

/// The seam between the plugin layer and the network.
///
/// Implemented by `LedgerConnection` (real HTTP + WebSocket session) and by
/// `MockLedger` for deterministic tests.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Ledger address prefix this session is bound to.
    fn prefix(&self) -> &str;

    /// Absolute account resource URI for a username on this ledger.
    fn account_uri(&self, username: &str) -> String;

    /// Idempotent: connecting while connected is a no-op success.
    async fn connect(&self) -> Result<(), LedgerError>;

    /// Idempotent: disconnecting while disconnected succeeds trivially.
    async fn disconnect(&self) -> Result<(), LedgerError>;

    fn is_connected(&self) -> bool;

    async fn submit_transfer(&self, transfer: &Transfer) -> Result<(), LedgerError>;

    async fn submit_message(&self, message: &Message) -> Result<(), LedgerError>;

    /// Submit a fulfillment for a previously-submitted conditional transfer.
    async fn submit_fulfillment(
        &self,
        transfer_id: Uuid,
        fulfillment: &str,
    ) -> Result<(), LedgerError>;

    /// Look up an account before provisioning a plugin for it. Absence is
    /// `AccountNotFound`, distinguishable from a connectivity failure.
    async fn fetch_account(&self, username: &str) -> Result<AccountInfo, LedgerError>;

    /// Raw inbound event stream. Every receiver sees every event, in arrival
    /// order.
    fn subscribe(&self) -> broadcast::Receiver<Notification>;

    /// Subscribe the session to notifications for the given account URIs.
    /// Resolves once the ledger has acknowledged the subscription.
    async fn subscribe_accounts(&self, account_uris: &[String]) -> Result<(), LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_info_serde() {
        let info: AccountInfo = serde_json::from_str(
            r#"{"name":"mike","ledger":"http://red.example","balance":"100"}"#,
        )
        .unwrap();
        assert_eq!(info.name, "mike");
        assert_eq!(info.balance.as_deref(), Some("100"));
    }

    #[test]
    fn account_info_minimal() {
        let info: AccountInfo = serde_json::from_str(r#"{"name":"mike"}"#).unwrap();
        assert_eq!(info.name, "mike");
        assert!(info.ledger.is_none());
        assert!(info.balance.is_none());
    }
}
