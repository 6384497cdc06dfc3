use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::LedgerError;

/// A unit of value movement between two ledger accounts.
///
/// `id` is caller-assigned and globally unique. `account` is the destination
/// address (`prefix + username`). `expires_at` is a ledger-side validity
/// deadline, not a client request timeout. Inbound transfers additionally
/// carry the resolved sender in `from`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: Uuid,
    pub account: String,
    pub amount: String,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
}

impl Transfer {
    pub fn new(account: impl Into<String>, amount: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account: account.into(),
            amount: amount.into(),
            expires_at,
            execution_condition: None,
            from: None,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.execution_condition = Some(condition.into());
        self
    }

    /// Local shape validation, run before any network call.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.account.is_empty() {
            return Err(LedgerError::InvalidTransfer("empty destination account".into()));
        }
        if !is_positive_decimal(&self.amount) {
            return Err(LedgerError::InvalidTransfer(format!(
                "amount must be a positive decimal string, got {:?}",
                self.amount
            )));
        }
        if self.expires_at <= Utc::now() {
            return Err(LedgerError::InvalidTransfer(format!(
                "expiresAt must be in the future, got {}",
                self.expires_at.to_rfc3339()
            )));
        }
        Ok(())
    }
}

/// Accepts strings like "1", "0.05", "10.5". Rejects signs, exponents,
/// multiple dots, and all-zero values.
fn is_positive_decimal(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let mut dots = 0;
    let mut nonzero_digit = false;
    for c in s.chars() {
        match c {
            '0' => {}
            '1'..='9' => nonzero_digit = true,
            '.' => {
                dots += 1;
                if dots > 1 {
                    return false;
                }
            }
            _ => return false,
        }
    }
    nonzero_digit
}
