pub mod account;
pub mod config;
pub mod errors;
pub mod message;
pub mod notify;
pub mod service;
pub mod transfer;

pub use account::{join_username, Account};
pub use errors::LedgerError;
pub use message::Message;
pub use notify::Notification;
pub use service::{AccountInfo, LedgerService};
pub use transfer::Transfer;
