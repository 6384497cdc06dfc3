use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use chime_client::{ConnectOptions, LedgerConnection};
use chime_core::{Account, LedgerError, LedgerService};

use crate::plugin::Plugin;
use crate::router::{NotificationRouter, Registry};

/// Options for a factory backed by a real admin session.
#[derive(Clone, Debug)]
pub struct FactoryOptions {
    /// Admin (or single-user) account the shared session authenticates as.
    pub admin: Account,
    pub connect: ConnectOptions,
}

/// Multiplexes one shared admin ledger session into per-username plugins.
///
/// The factory exclusively owns the session and the registry. At most one
/// plugin exists per username; entries leave the registry only through
/// `remove`. All registry mutation runs under one async mutex so concurrent
/// `create` calls cannot race to two instances, while routing lookups read
/// the map concurrently.
pub struct PluginFactory {
    service: Arc<dyn LedgerService>,
    registry: Arc<Registry>,
    mutate: Mutex<()>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl PluginFactory {
    pub fn new(options: FactoryOptions) -> Self {
        Self::with_service(Arc::new(LedgerConnection::new(
            options.admin,
            options.connect,
        )))
    }

    /// Build over any ledger service implementation. The seam the tests use
    /// to run against an in-memory ledger.
    pub fn with_service(service: Arc<dyn LedgerService>) -> Self {
        Self {
            service,
            registry: Arc::new(DashMap::new()),
            mutate: Mutex::new(()),
            router: Mutex::new(None),
        }
    }

    /// Establish the shared session and start routing. Idempotent: a second
    /// call while connected is a no-op success and never opens a second
    /// underlying session.
    pub async fn connect(&self) -> Result<(), LedgerError> {
        let _guard = self.mutate.lock().await;
        let mut router = self.router.lock().await;
        if self.service.is_connected() && router.is_some() {
            return Ok(());
        }

        self.service.connect().await?;

        if router.is_none() {
            let dispatcher = NotificationRouter::new(
                Arc::clone(&self.registry),
                self.service.prefix().to_string(),
            );
            *router = Some(dispatcher.start(self.service.subscribe()));
        }

        // After a reconnect the ledger has forgotten our subscriptions;
        // re-register every account we still manage.
        let uris = self.account_uris();
        if !uris.is_empty() {
            self.service.subscribe_accounts(&uris).await?;
        }
        Ok(())
    }

    /// Tear down the shared session. Cached plugins stay registered and all
    /// report disconnected until the factory reconnects.
    pub async fn disconnect(&self) -> Result<(), LedgerError> {
        let _guard = self.mutate.lock().await;
        let mut router = self.router.lock().await;
        if let Some(handle) = router.take() {
            handle.abort();
        }
        self.service.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.service.is_connected()
    }

    /// Return the cached plugin for `username`, or provision a new one after
    /// verifying the account exists on the ledger. A failed verification or
    /// subscription leaves the registry untouched.
    pub async fn create(&self, username: &str) -> Result<Arc<Plugin>, LedgerError> {
        let _guard = self.mutate.lock().await;

        if let Some(existing) = self.registry.get(username) {
            return Ok(Arc::clone(existing.value()));
        }
        if !self.service.is_connected() {
            return Err(LedgerError::NotConnected);
        }

        let _ = self.service.fetch_account(username).await?;

        let mut uris = self.account_uris();
        uris.push(self.service.account_uri(username));
        uris.sort();
        self.service.subscribe_accounts(&uris).await?;

        let plugin = Arc::new(Plugin::new(username, Arc::clone(&self.service)));
        let _ = self
            .registry
            .insert(username.to_string(), Arc::clone(&plugin));
        tracing::info!(username, "plugin created");
        Ok(plugin)
    }

    /// Drop the cache entry for `username`; a no-op when absent. In-flight
    /// sends on the removed plugin complete normally, but the router stops
    /// delivering inbound events for the account immediately.
    pub async fn remove(&self, username: &str) {
        let _guard = self.mutate.lock().await;
        if self.registry.remove(username).is_some() {
            tracing::debug!(username, "plugin removed");
        }
    }

    /// Read-only registry lookup.
    pub fn plugin(&self, username: &str) -> Option<Arc<Plugin>> {
        self.registry
            .get(username)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn plugin_count(&self) -> usize {
        self.registry.len()
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    fn account_uris(&self) -> Vec<String> {
        let mut uris: Vec<String> = self
            .registry
            .iter()
            .map(|entry| self.service.account_uri(entry.key()))
            .collect();
        uris.sort();
        uris
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_client::MockLedger;
    use chime_core::{Message, Notification, Transfer};
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    fn future_transfer(destination: &str) -> Transfer {
        Transfer::new(destination, "1", Utc::now() + chrono::Duration::seconds(10))
    }

    async fn connected_factory() -> (Arc<MockLedger>, PluginFactory) {
        let mock = Arc::new(
            MockLedger::new("example.red.")
                .with_account("mike")
                .with_account("mary"),
        );
        let factory = PluginFactory::with_service(Arc::clone(&mock) as Arc<dyn LedgerService>);
        factory.connect().await.unwrap();
        (mock, factory)
    }

    #[tokio::test]
    async fn will_not_connect_twice() {
        let (mock, factory) = connected_factory().await;
        assert!(factory.is_connected());

        factory.connect().await.unwrap();
        assert!(factory.is_connected());
        assert_eq!(mock.connect_calls(), 1, "second connect must be a no-op");
    }

    #[tokio::test]
    async fn disconnects() {
        let (_mock, factory) = connected_factory().await;
        factory.disconnect().await.unwrap();
        assert!(!factory.is_connected());
        // idempotent
        factory.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn creates_a_plugin() {
        let (_mock, factory) = connected_factory().await;
        let plugin = factory.create("mike").await.unwrap();
        assert!(plugin.is_connected());
        assert_eq!(plugin.address(), "example.red.mike");
        assert!(factory.plugin("mike").is_some());
    }

    #[tokio::test]
    async fn only_one_plugin_per_account() {
        let (_mock, factory) = connected_factory().await;
        let first = factory.create("mike").await.unwrap();
        let second = factory.create("mike").await.unwrap();
        assert!(
            Arc::ptr_eq(&first, &second),
            "repeated create must return the same instance"
        );
        assert_eq!(factory.plugin_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_creates_do_not_race() {
        let (_mock, factory) = connected_factory().await;
        let (a, b) = tokio::join!(factory.create("mike"), factory.create("mike"));
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(factory.plugin_count(), 1);
    }

    #[tokio::test]
    async fn will_not_create_a_nonexistent_account() {
        let (_mock, factory) = connected_factory().await;
        // no username matching a random uuid is registered
        let err = factory.create(&Uuid::new_v4().to_string()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(factory.plugin_count(), 0, "failed create must not cache");
    }

    #[tokio::test]
    async fn create_requires_connection() {
        let mock = Arc::new(MockLedger::new("example.red.").with_account("mike"));
        let factory = PluginFactory::with_service(Arc::clone(&mock) as Arc<dyn LedgerService>);
        let err = factory.create("mike").await.unwrap_err();
        assert!(matches!(err, LedgerError::NotConnected));
    }

    #[tokio::test]
    async fn create_subscribes_the_new_account() {
        let (mock, factory) = connected_factory().await;
        let _ = factory.create("mike").await.unwrap();
        let _ = factory.create("mary").await.unwrap();

        let subscriptions = mock.subscriptions();
        assert_eq!(
            subscriptions.last().unwrap(),
            &vec![
                "http://ledger.mock/accounts/mary".to_string(),
                "http://ledger.mock/accounts/mike".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn passes_a_notification_to_the_correct_plugin() {
        let (_mock, factory) = connected_factory().await;
        let plugin1 = factory.create("mike").await.unwrap();
        let plugin2 = factory.create("mary").await.unwrap();

        let mut mary_transfers = plugin2.subscribe_transfers();
        let mut mike_transfers = plugin1.subscribe_transfers();

        let transfer = future_transfer("example.red.mary");
        let id = transfer.id;
        plugin1.send_transfer(transfer).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = mary_transfers.try_recv().unwrap();
        assert_eq!(got.id, id);
        assert!(
            mary_transfers.try_recv().is_err(),
            "must be delivered exactly once"
        );
        assert!(
            mike_transfers.try_recv().is_err(),
            "sender must not receive its own transfer"
        );
    }

    #[tokio::test]
    async fn passes_a_message_with_sender_identity() {
        let (_mock, factory) = connected_factory().await;
        let plugin1 = factory.create("mike").await.unwrap();
        let plugin2 = factory.create("mary").await.unwrap();

        let mut mary_messages = plugin2.subscribe_messages();

        let message = Message::new("example.red.", "example.red.mary", json!({"foo": "bar"}));
        plugin1.send_message(message).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        let got = mary_messages.try_recv().unwrap();
        let sender = got.sender().expect("inbound message must carry a sender");
        assert_eq!(sender, plugin1.address());
        assert_eq!(got.data, json!({"foo": "bar"}));
    }

    #[tokio::test]
    async fn back_to_back_transfers_arrive_in_order() {
        let (_mock, factory) = connected_factory().await;
        let plugin1 = factory.create("mike").await.unwrap();
        let plugin2 = factory.create("mary").await.unwrap();

        let mut mary_transfers = plugin2.subscribe_transfers();

        let first = future_transfer("example.red.mary");
        let second = future_transfer("example.red.mary");
        let (id1, id2) = (first.id, second.id);
        plugin1.send_transfer(first).await.unwrap();
        plugin1.send_transfer(second).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(mary_transfers.try_recv().unwrap().id, id1);
        assert_eq!(mary_transfers.try_recv().unwrap().id, id2);
    }

    #[tokio::test]
    async fn removes_a_plugin() {
        let (mock, factory) = connected_factory().await;
        let plugin = factory.create("mike").await.unwrap();
        let mut rx = plugin.subscribe_transfers();

        factory.remove("mike").await;
        assert!(factory.plugin("mike").is_none());

        // events for the removed account are dropped without error
        mock.emit(Notification::IncomingTransfer(future_transfer(
            "example.red.mike",
        )));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        // removing again is a no-op, not an error
        factory.remove("mike").await;
    }

    #[tokio::test]
    async fn registry_survives_disconnect() {
        let (_mock, factory) = connected_factory().await;
        let plugin = factory.create("mike").await.unwrap();

        factory.disconnect().await.unwrap();
        assert!(!plugin.is_connected());
        assert!(
            factory.plugin("mike").is_some(),
            "entries leave the registry only through remove"
        );
    }

    #[tokio::test]
    async fn reconnect_resubscribes_managed_accounts() {
        let (mock, factory) = connected_factory().await;
        let _ = factory.create("mike").await.unwrap();

        factory.disconnect().await.unwrap();
        factory.connect().await.unwrap();

        let subscriptions = mock.subscriptions();
        assert_eq!(
            subscriptions.last().unwrap(),
            &vec!["http://ledger.mock/accounts/mike".to_string()]
        );

        // routing still works on the new stream
        let plugin = factory.plugin("mike").unwrap();
        let mut rx = plugin.subscribe_transfers();
        let transfer = future_transfer("example.red.mike");
        let id = transfer.id;
        mock.emit(Notification::IncomingTransfer(transfer));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.try_recv().unwrap().id, id);
    }

    #[tokio::test]
    async fn routing_is_keyed_on_registry_state_at_dispatch_time() {
        let (mock, factory) = connected_factory().await;
        let plugin = factory.create("mary").await.unwrap();
        let mut rx = plugin.subscribe_transfers();

        // an event already in flight when create returned is still delivered
        let transfer = future_transfer("example.red.mary");
        let id = transfer.id;
        mock.emit(Notification::IncomingTransfer(transfer));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.try_recv().unwrap().id, id);
    }
}
