use std::time::Duration;

/// Typed error hierarchy for ledger client operations.
/// Classifies failures so callers can tell a retryable transport fault from a
/// structured remote rejection or a local validation miss.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LedgerError {
    // Connection lifecycle
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("not connected to the ledger")]
    NotConnected,

    // Local, recoverable
    #[error("account not found: {username}")]
    AccountNotFound { username: String },
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    // Structured remote rejection, surfaced verbatim
    #[error("ledger rejected request ({status} {kind}): {message}")]
    Rejected {
        status: u16,
        kind: String,
        message: String,
    },

    // Transport
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::NetworkError(_) | Self::Timeout(_)
        ) || matches!(self, Self::Rejected { status, .. } if *status >= 500)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AccountNotFound { .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connection_failed",
            Self::NotConnected => "not_connected",
            Self::AccountNotFound { .. } => "account_not_found",
            Self::InvalidTransfer(_) => "invalid_transfer",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Rejected { .. } => "rejected",
            Self::NetworkError(_) => "network_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Build a `Rejected` error from a non-2xx response. The ledger returns a
    /// structured body `{ "id": "<ErrorKind>", "message": "..." }`; when the
    /// body is not parseable the raw text is kept as the message.
    pub fn from_response(status: u16, body: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
        let kind = parsed
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(|v| v.as_str())
            .unwrap_or("UnknownError")
            .to_string();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or(body)
            .to_string();
        Self::Rejected {
            status,
            kind,
            message,
        }
    }
}
