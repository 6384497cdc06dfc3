use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use chime_core::{
    join_username, Account, AccountInfo, LedgerError, LedgerService, Message, Notification,
    Transfer,
};

use crate::rpc::{self, Frame, RpcRequest};
use crate::urls::LedgerUrls;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const NOTIFY_CHANNEL_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pending RPC waiting for the ledger's acknowledgement.
type PendingTx = oneshot::Sender<Result<(), String>>;

/// Options for an authenticated ledger session.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    /// Applied to every outbound call and RPC acknowledgement. Unrelated to a
    /// transfer's `expires_at`, which is a ledger-side validity deadline.
    pub request_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// One authenticated session to a ledger: a reqwest client for outbound calls
/// plus a persistent WebSocket pushing notifications.
pub struct LedgerConnection {
    account: Account,
    options: ConnectOptions,
    http: reqwest::Client,
    connected: AtomicBool,
    urls: parking_lot::RwLock<Option<LedgerUrls>>,
    notify_tx: broadcast::Sender<Notification>,
    session: Mutex<Option<Session>>,
}

struct Session {
    cmd_tx: mpsc::Sender<SocketCommand>,
    task: JoinHandle<()>,
}

/// Internal RPC command routed through the socket task.
struct SocketCommand {
    method: String,
    params: Value,
    response_tx: PendingTx,
}

impl LedgerConnection {
    pub fn new(account: Account, options: ConnectOptions) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFY_CHANNEL_CAPACITY);
        Self {
            http: reqwest::Client::builder()
                .timeout(options.request_timeout)
                .build()
                .expect("failed to build HTTP client"),
            account,
            options,
            connected: AtomicBool::new(false),
            urls: parking_lot::RwLock::new(None),
            notify_tx,
            session: Mutex::new(None),
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Open the session: fetch the ledger's URL table, connect the WebSocket,
    /// subscribe to our own account. Calling while connected is a no-op.
    async fn do_connect(&self) -> Result<(), LedgerError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut session = self.session.lock().await;
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let root = LedgerUrls::root_of(&self.account.uri)?;
        let resp = self
            .http
            .get(&root)
            .basic_auth(
                &self.account.username,
                Some(self.account.password.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| LedgerError::ConnectionFailed(format!("ledger metadata: {e}")))?;
        if !resp.status().is_success() {
            return Err(LedgerError::ConnectionFailed(format!(
                "ledger metadata returned {}",
                resp.status()
            )));
        }
        let metadata: Value = resp.json().await.unwrap_or_else(|_| json!({}));
        let urls = LedgerUrls::from_metadata(&metadata, &root);

        let mut request = urls
            .websocket
            .as_str()
            .into_client_request()
            .map_err(|e| LedgerError::ConnectionFailed(format!("websocket url: {e}")))?;
        let _ = request
            .headers_mut()
            .insert(AUTHORIZATION, self.basic_auth_header()?);
        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| LedgerError::ConnectionFailed(format!("websocket connect: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::channel::<SocketCommand>(64);
        let task = tokio::spawn(socket_loop(ws, cmd_rx, self.notify_tx.clone()));

        *self.urls.write() = Some(urls);
        *session = Some(Session { cmd_tx, task });
        self.connected.store(true, Ordering::SeqCst);
        drop(session);

        if let Err(e) = self
            .subscribe_to(&[self.account.resource_uri()])
            .await
        {
            let _ = self.do_disconnect().await;
            return Err(LedgerError::ConnectionFailed(format!(
                "account subscription: {e}"
            )));
        }

        tracing::info!(account = %self.account.address(), "ledger session established");
        Ok(())
    }

    async fn do_disconnect(&self) -> Result<(), LedgerError> {
        let mut session = self.session.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(s) = session.take() {
            s.task.abort();
            tracing::debug!(account = %self.account.address(), "ledger session closed");
        }
        Ok(())
    }

    async fn subscribe_to(&self, account_uris: &[String]) -> Result<(), LedgerError> {
        self.send_rpc(
            "subscribe_account",
            json!({
                "eventType": "*",
                "accounts": account_uris,
            }),
        )
        .await
    }

    async fn send_rpc(&self, method: &str, params: Value) -> Result<(), LedgerError> {
        let cmd_tx = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.cmd_tx.clone())
            .ok_or(LedgerError::NotConnected)?;

        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(SocketCommand {
                method: method.to_string(),
                params,
                response_tx: tx,
            })
            .await
            .map_err(|_| LedgerError::NotConnected)?;

        tokio::time::timeout(self.options.request_timeout, rx)
            .await
            .map_err(|_| LedgerError::Timeout(self.options.request_timeout))?
            .map_err(|_| LedgerError::NetworkError("socket task dropped the response".into()))?
            .map_err(LedgerError::NetworkError)
    }

    fn basic_auth_header(&self) -> Result<HeaderValue, LedgerError> {
        let token = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            self.account.username,
            self.account.password.expose_secret()
        ));
        HeaderValue::from_str(&format!("Basic {token}"))
            .map_err(|e| LedgerError::ConnectionFailed(format!("auth header: {e}")))
    }

    fn urls_snapshot(&self) -> Result<LedgerUrls, LedgerError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(LedgerError::NotConnected);
        }
        self.urls.read().clone().ok_or(LedgerError::NotConnected)
    }

    fn map_reqwest(&self, e: reqwest::Error) -> LedgerError {
        if e.is_timeout() {
            LedgerError::Timeout(self.options.request_timeout)
        } else {
            LedgerError::NetworkError(e.to_string())
        }
    }

    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, LedgerError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(LedgerError::from_response(status.as_u16(), &body))
    }
}

#[async_trait]
impl LedgerService for LedgerConnection {
    fn prefix(&self) -> &str {
        &self.account.prefix
    }

    fn account_uri(&self, username: &str) -> String {
        join_username(&self.account.uri, username)
    }

    async fn connect(&self) -> Result<(), LedgerError> {
        self.do_connect().await
    }

    async fn disconnect(&self) -> Result<(), LedgerError> {
        self.do_disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn submit_transfer(&self, transfer: &Transfer) -> Result<(), LedgerError> {
        transfer.validate()?;
        let urls = self.urls_snapshot()?;
        let url = LedgerUrls::expand(&urls.transfer, &transfer.id.to_string());
        let resp = self
            .http
            .put(&url)
            .basic_auth(
                &self.account.username,
                Some(self.account.password.expose_secret()),
            )
            .json(transfer)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let _ = Self::check_response(resp).await?;
        tracing::debug!(id = %transfer.id, account = %transfer.account, "transfer submitted");
        Ok(())
    }

    async fn submit_message(&self, message: &Message) -> Result<(), LedgerError> {
        if message.destination().is_none() {
            return Err(LedgerError::InvalidMessage("no destination account".into()));
        }
        let urls = self.urls_snapshot()?;
        let resp = self
            .http
            .post(&urls.message)
            .basic_auth(
                &self.account.username,
                Some(self.account.password.expose_secret()),
            )
            .json(message)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let _ = Self::check_response(resp).await?;
        Ok(())
    }

    async fn submit_fulfillment(
        &self,
        transfer_id: Uuid,
        fulfillment: &str,
    ) -> Result<(), LedgerError> {
        let urls = self.urls_snapshot()?;
        let url = LedgerUrls::expand(&urls.transfer_fulfillment, &transfer_id.to_string());
        let resp = self
            .http
            .put(&url)
            .basic_auth(
                &self.account.username,
                Some(self.account.password.expose_secret()),
            )
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(fulfillment.to_string())
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        let _ = Self::check_response(resp).await?;
        Ok(())
    }

    async fn fetch_account(&self, username: &str) -> Result<AccountInfo, LedgerError> {
        let urls = self.urls_snapshot()?;
        let url = LedgerUrls::expand(&urls.account, username);
        let resp = self
            .http
            .get(&url)
            .basic_auth(
                &self.account.username,
                Some(self.account.password.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;
        if resp.status().as_u16() == 404 {
            return Err(LedgerError::AccountNotFound {
                username: username.to_string(),
            });
        }
        let resp = Self::check_response(resp).await?;
        resp.json::<AccountInfo>()
            .await
            .map_err(|e| LedgerError::NetworkError(format!("account body: {e}")))
    }

    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    async fn subscribe_accounts(&self, account_uris: &[String]) -> Result<(), LedgerError> {
        self.subscribe_to(account_uris).await
    }
}

/// Socket task: sends RPCs from the command channel, routes acknowledgements
/// back by id, and fans notifications into the broadcast channel.
async fn socket_loop(
    ws: WsStream,
    mut cmd_rx: mpsc::Receiver<SocketCommand>,
    notify_tx: broadcast::Sender<Notification>,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let mut pending: HashMap<u64, PendingTx> = HashMap::new();
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id;
                next_id += 1;
                let req = RpcRequest::new(id, cmd.method, cmd.params);
                let Ok(text) = serde_json::to_string(&req) else {
                    let _ = cmd.response_tx.send(Err("request serialization failed".into()));
                    continue;
                };
                let _ = pending.insert(id, cmd.response_tx);
                if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                    break;
                }
            }
            frame = ws_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                let WsMessage::Text(text) = frame else { continue };
                match rpc::parse_frame(&text) {
                    Frame::Response { id, error } => {
                        if let Some(tx) = pending.remove(&id) {
                            let _ = tx.send(match error {
                                Some(e) => Err(e),
                                None => Ok(()),
                            });
                        }
                    }
                    Frame::Notify(notification) => {
                        if notify_tx.send(notification).is_err() {
                            tracing::trace!("notification dropped, no subscribers");
                        }
                    }
                    Frame::Other => {}
                }
            }
        }
    }
}
