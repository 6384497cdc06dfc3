pub mod connection;
pub mod rpc;
pub mod urls;

pub mod mock;

pub use connection::{ConnectOptions, LedgerConnection};
pub use mock::MockLedger;
pub use urls::LedgerUrls;
