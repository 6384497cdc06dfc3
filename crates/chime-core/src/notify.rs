use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::transfer::Transfer;

/// A raw inbound event pushed by the ledger on the shared stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "resource")]
pub enum Notification {
    #[serde(rename = "incoming_transfer")]
    IncomingTransfer(Transfer),

    #[serde(rename = "incoming_message")]
    IncomingMessage(Message),
}

impl Notification {
    /// Destination account address, used by the router to pick a plugin.
    pub fn destination(&self) -> Option<&str> {
        match self {
            Self::IncomingTransfer(t) => Some(t.account.as_str()),
            Self::IncomingMessage(m) => m.destination(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncomingTransfer(_) => "incoming_transfer",
            Self::IncomingMessage(_) => "incoming_message",
        }
    }
}
