use serde::Serialize;
use serde_json::Value;

use chime_core::Notification;

/// Outgoing JSON-RPC 2.0 request frame.
#[derive(Clone, Debug, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// A parsed inbound WebSocket frame.
#[derive(Debug)]
pub enum Frame {
    /// Response to a request we sent; `error` holds the remote message if the
    /// call failed.
    Response { id: u64, error: Option<String> },
    /// Push notification carrying a ledger event.
    Notify(Notification),
    /// Anything else (unknown method, malformed body). Ignored by callers.
    Other,
}

/// Classify a raw text frame. Notifications arrive as
/// `{"jsonrpc":"2.0","method":"notify","params":{"type":...,"resource":...}}`.
pub fn parse_frame(text: &str) -> Frame {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Frame::Other;
    };

    if let Some(id) = value.get("id").and_then(Value::as_u64) {
        let error = value
            .get("error")
            .filter(|e| !e.is_null())
            .map(|e| {
                e.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("rpc error")
                    .to_string()
            });
        return Frame::Response { id, error };
    }

    if value.get("method").and_then(Value::as_str) == Some("notify") {
        if let Some(params) = value.get("params") {
            if let Ok(notification) = serde_json::from_value::<Notification>(params.clone()) {
                return Frame::Notify(notification);
            }
        }
    }

    Frame::Other
}
