use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use chime_core::Notification;

use crate::plugin::Plugin;

pub(crate) type Registry = DashMap<String, Arc<Plugin>>;

/// Consumes the shared notification stream and fans each event out to the
/// plugin owning the destination account.
///
/// Routing is keyed on registry state at dispatch time: an event for an
/// account whose plugin was created after the event was sent on the wire is
/// still delivered, and events for unmanaged accounts are dropped without
/// error. Dispatch is a single loop with a non-blocking send per plugin, so
/// per-account delivery order equals arrival order.
pub struct NotificationRouter {
    registry: Arc<Registry>,
    prefix: String,
}

impl NotificationRouter {
    pub(crate) fn new(registry: Arc<Registry>, prefix: String) -> Self {
        Self { registry, prefix }
    }

    /// Start the dispatch loop. Runs until the stream closes or the handle is
    /// aborted.
    pub fn start(self, mut rx: broadcast::Receiver<Notification>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notification) => self.route(&notification),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "notification router lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("notification stream closed");
                        break;
                    }
                }
            }
        })
    }

    fn route(&self, notification: &Notification) {
        let Some(destination) = notification.destination() else {
            tracing::debug!(kind = notification.kind(), "event without destination, dropped");
            return;
        };
        let Some(username) = destination.strip_prefix(self.prefix.as_str()) else {
            tracing::debug!(destination, "event outside ledger prefix, dropped");
            return;
        };
        match self.registry.get(username) {
            Some(plugin) => plugin.deliver(notification),
            None => {
                tracing::debug!(destination, "no plugin for account, dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_client::MockLedger;
    use chime_core::{LedgerService, Message, Transfer};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn future_transfer(destination: &str) -> Transfer {
        Transfer::new(destination, "1", Utc::now() + chrono::Duration::seconds(10))
    }

    fn registry_with(usernames: &[&str], service: &Arc<MockLedger>) -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        for username in usernames {
            let plugin = Plugin::new(
                username,
                Arc::clone(service) as Arc<dyn LedgerService>,
            );
            let _ = registry.insert(username.to_string(), Arc::new(plugin));
        }
        registry
    }

    #[tokio::test]
    async fn routes_to_matching_plugin_only() {
        let mock = Arc::new(MockLedger::new("example.red."));
        mock.connect().await.unwrap();
        let registry = registry_with(&["mike", "mary"], &mock);

        let mut mary_rx = registry.get("mary").unwrap().subscribe_transfers();
        let mut mike_rx = registry.get("mike").unwrap().subscribe_transfers();

        let router = NotificationRouter::new(Arc::clone(&registry), "example.red.".into());
        let handle = router.start(mock.subscribe());

        let transfer = future_transfer("example.red.mary");
        mock.emit(Notification::IncomingTransfer(transfer.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(mary_rx.try_recv().unwrap().id, transfer.id);
        assert!(mike_rx.try_recv().is_err(), "must not reach other plugins");

        handle.abort();
    }

    #[tokio::test]
    async fn unmanaged_account_is_dropped_silently() {
        let mock = Arc::new(MockLedger::new("example.red."));
        mock.connect().await.unwrap();
        let registry = registry_with(&["mike"], &mock);
        let mut mike_rx = registry.get("mike").unwrap().subscribe_transfers();

        let router = NotificationRouter::new(Arc::clone(&registry), "example.red.".into());
        let handle = router.start(mock.subscribe());

        mock.emit(Notification::IncomingTransfer(future_transfer(
            "example.red.stranger",
        )));
        mock.emit(Notification::IncomingTransfer(future_transfer(
            "example.blue.mike",
        )));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mike_rx.try_recv().is_err());

        handle.abort();
    }

    #[tokio::test]
    async fn per_account_ordering_is_preserved() {
        let mock = Arc::new(MockLedger::new("example.red."));
        mock.connect().await.unwrap();
        let registry = registry_with(&["mary"], &mock);
        let mut mary_rx = registry.get("mary").unwrap().subscribe_transfers();

        let router = NotificationRouter::new(Arc::clone(&registry), "example.red.".into());
        let handle = router.start(mock.subscribe());

        let first = future_transfer("example.red.mary");
        let second = future_transfer("example.red.mary");
        mock.emit(Notification::IncomingTransfer(first.clone()));
        mock.emit(Notification::IncomingTransfer(second.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(mary_rx.try_recv().unwrap().id, first.id);
        assert_eq!(mary_rx.try_recv().unwrap().id, second.id);

        handle.abort();
    }

    #[tokio::test]
    async fn routes_messages_by_destination() {
        let mock = Arc::new(MockLedger::new("example.red."));
        mock.connect().await.unwrap();
        let registry = registry_with(&["mary"], &mock);
        let mut mary_rx = registry.get("mary").unwrap().subscribe_messages();

        let router = NotificationRouter::new(Arc::clone(&registry), "example.red.".into());
        let handle = router.start(mock.subscribe());

        mock.emit(Notification::IncomingMessage(Message {
            ledger: "example.red.".into(),
            account: Some("example.red.mike".into()),
            from: Some("example.red.mike".into()),
            to: Some("example.red.mary".into()),
            data: json!({"foo": "bar"}),
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = mary_rx.try_recv().unwrap();
        assert_eq!(got.sender(), Some("example.red.mike"));

        handle.abort();
    }
}
