use serde::{Deserialize, Serialize};

/// An opaque message between two ledger accounts.
///
/// The wire protocol carries the counterparty in two generations of fields:
/// `from`/`to` on newer ledgers, `account` on older ones. Outbound, callers
/// set `account` (or `to`) to the destination; inbound, the ledger resolves
/// the sender into `from` and mirrors it into `account`. `sender()` and
/// `destination()` encode the precedence so the rest of the crate never
/// touches the raw fields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub ledger: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub data: serde_json::Value,
}

impl Message {
    pub fn new(
        ledger: impl Into<String>,
        account: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            ledger: ledger.into(),
            account: Some(account.into()),
            from: None,
            to: None,
            data,
        }
    }

    /// The sender's address: `from`, falling back to the legacy `account`.
    pub fn sender(&self) -> Option<&str> {
        self.from.as_deref().or(self.account.as_deref())
    }

    /// The destination address: `to`, falling back to the legacy `account`.
    pub fn destination(&self) -> Option<&str> {
        self.to.as_deref().or(self.account.as_deref())
    }
}
