use serde_json::Value;

use chime_core::LedgerError;

/// Resource URL table advertised by the ledger's metadata endpoint.
///
/// Templates use `:id` / `:name` placeholders, e.g.
/// `http://red.example/transfers/:id/fulfillment`.
#[derive(Clone, Debug)]
pub struct LedgerUrls {
    pub account: String,
    pub transfer: String,
    pub transfer_fulfillment: String,
    pub message: String,
    pub websocket: String,
}

impl LedgerUrls {
    /// Conventional layout under a ledger root, used when the metadata body
    /// does not advertise a `urls` table.
    pub fn defaults(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        let ws_root = if let Some(rest) = root.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            format!("ws://{}", root.strip_prefix("http://").unwrap_or(root))
        };
        Self {
            account: format!("{root}/accounts/:name"),
            transfer: format!("{root}/transfers/:id"),
            transfer_fulfillment: format!("{root}/transfers/:id/fulfillment"),
            message: format!("{root}/messages"),
            websocket: format!("{ws_root}/websocket"),
        }
    }

    /// Read the `urls` table from a metadata body, falling back to the
    /// conventional layout for any missing entry.
    pub fn from_metadata(metadata: &Value, root: &str) -> Self {
        let defaults = Self::defaults(root);
        let urls = metadata.get("urls");
        let pick = |key: &str, fallback: &str| {
            urls.and_then(|u| u.get(key))
                .and_then(|v| v.as_str())
                .unwrap_or(fallback)
                .to_string()
        };
        Self {
            account: pick("account", &defaults.account),
            transfer: pick("transfer", &defaults.transfer),
            transfer_fulfillment: pick("transfer_fulfillment", &defaults.transfer_fulfillment),
            message: pick("message", &defaults.message),
            websocket: pick("websocket", &defaults.websocket),
        }
    }

    /// Expand the `:id` or `:name` placeholder in a template.
    pub fn expand(template: &str, value: &str) -> String {
        template.replace(":id", value).replace(":name", value)
    }

    /// Ledger root (scheme + authority) derived from an absolute URI under it.
    pub fn root_of(uri: &str) -> Result<String, LedgerError> {
        let parsed = url::Url::parse(uri)
            .map_err(|e| LedgerError::ConnectionFailed(format!("invalid ledger uri {uri:?}: {e}")))?;
        Ok(parsed.origin().ascii_serialization())
    }
}
