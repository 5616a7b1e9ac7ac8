use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream, StreamExt};
use futures_util::SinkExt;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use lattice_core::error::Error;

/// Default deadline for socket calls.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for the lightweight reads issued during resolution.
pub const SHORT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;
type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, Error>>>>>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Platform base URL, e.g. `https://app.lattice.example`.
    pub base_url: String,
    pub email: String,
    pub password: String,
    /// The workspace selector passed to `selectWorkspace`.
    pub workspace: String,
}

/// One persistent socket session against the platform's realtime API.
///
/// Opened with a two-step account handshake, then multiplexes concurrent
/// request/response pairs over the single connection by correlation id.
/// When the socket dies the session is dead for good — callers reopen.
pub struct Session {
    config: SessionConfig,
    workspace_token: String,
    /// Identity the platform reported for this session, if any.
    social_id: Option<String>,
    alive: Arc<AtomicBool>,
    next_id: AtomicU64,
    pending: PendingTable,
    sink: Mutex<WsSink>,
}

impl Session {
    /// Performs the handshake and opens the socket. Any handshake response
    /// carrying an `error` field aborts before the socket is attempted.
    pub async fn open(config: SessionConfig) -> Result<Self, Error> {
        let http = reqwest::Client::new();
        let accounts_url = format!("{}/_accounts", config.base_url.trim_end_matches('/'));

        let login = account_request(
            &http,
            &accounts_url,
            None,
            json!({
                "method": "login",
                "params": { "email": config.email, "password": config.password }
            }),
        )
        .await?;
        let account_token = login
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Auth(json!({"message": "login result carried no token"})))?
            .to_string();

        let selected = account_request(
            &http,
            &accounts_url,
            Some(&account_token),
            json!({
                "method": "selectWorkspace",
                "params": { "workspaceUrl": config.workspace, "kind": "external" }
            }),
        )
        .await?;
        let workspace_token = selected
            .get("token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Auth(json!({"message": "selectWorkspace result carried no token"}))
            })?
            .to_string();
        let social_id = selected
            .get("socialId")
            .or_else(|| selected.get("account"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let socket_url = socket_url(&config.base_url, &workspace_token)?;
        let (stream, _response) = connect_async(&socket_url)
            .await
            .map_err(|e| Error::Transport(format!("socket connect failed: {e}")))?;
        let (sink, source) = stream.split();

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(read_loop(source, Arc::clone(&pending), Arc::clone(&alive)));

        tracing::info!(workspace = %config.workspace, "session open");
        Ok(Self {
            config,
            workspace_token,
            social_id,
            alive,
            next_id: AtomicU64::new(1),
            pending,
            sink: Mutex::new(sink),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn social_id(&self) -> Option<&str> {
        self.social_id.as_deref()
    }

    /// Sends `{id, method, params}` and awaits the reply carrying the same
    /// id. Exactly one of reply, timeout, or socket death settles the call;
    /// a reply arriving after the deadline finds no waiter and is dropped.
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, Error> {
        if !self.is_alive() {
            return Err(Error::Transport("session socket is closed".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = json!({"id": id, "method": method, "params": params}).to_string();
        let sent = self.sink.lock().await.send(WsMessage::text(frame)).await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(Error::Transport(format!("socket send failed: {e}")));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            // Sender dropped without a reply: the read loop shut down
            // between registration and settlement.
            Ok(Err(_)) => Err(Error::Transport("session socket is closed".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout {
                    method: method.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// `findAll` over the socket with the result envelope normalized to a
    /// plain list.
    pub async fn find_all(
        &self,
        class: &str,
        query: Value,
        options: Value,
        timeout: Duration,
    ) -> Result<Vec<Value>, Error> {
        let result = self
            .call("findAll", json!([class, query, options]), timeout)
            .await?;
        Ok(extract_list(result))
    }

    /// Uploads rich-text markup through the platform's ingestion path and
    /// returns the content reference to store on the owning record. The
    /// client is transient: the platform permits one caller of this path
    /// per session token at a time, so it must not outlive the request.
    pub async fn upload_markup(
        &self,
        workspace_id: &str,
        object_id: &str,
        object_class: &str,
        markup: &str,
    ) -> Result<String, Error> {
        let http = reqwest::Client::new();
        let url = format!("{}/_markup", self.config.base_url.trim_end_matches('/'));
        let response = http
            .post(&url)
            .bearer_auth(&self.workspace_token)
            .json(&json!({
                "workspaceId": workspace_id,
                "objectId": object_id,
                "objectClass": object_class,
                "markup": markup,
            }))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("markup upload failed: {e}")))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("markup upload returned no body: {e}")))?;
        if let Some(error) = body.get("error") {
            return Err(Error::Api(error.clone()));
        }
        match body.get("result") {
            Some(Value::String(reference)) => Ok(reference.clone()),
            _ => Err(Error::Api(body)),
        }
    }
}

/// One POST against the `_accounts` endpoint. A decoded body carrying an
/// `error` field aborts with the payload; otherwise `result` is returned.
async fn account_request(
    http: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: Value,
) -> Result<Value, Error> {
    let mut request = http.post(url).json(&body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }
    let response = request
        .send()
        .await
        .map_err(|e| Error::Transport(format!("account request failed: {e}")))?;
    let decoded: Value = response
        .json()
        .await
        .map_err(|e| Error::Auth(json!({"message": format!("account reply unreadable: {e}")})))?;

    if let Some(error) = decoded.get("error") {
        return Err(Error::Auth(error.clone()));
    }
    decoded
        .get("result")
        .cloned()
        .ok_or_else(|| Error::Auth(json!({"message": "account reply carried no result"})))
}

/// `wss://host/<workspaceToken>` derived from the platform base URL.
fn socket_url(base_url: &str, workspace_token: &str) -> Result<String, Error> {
    let url = reqwest::Url::parse(base_url)
        .map_err(|e| Error::Configuration(format!("invalid base url '{base_url}': {e}")))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(Error::Configuration(format!(
                "unsupported base url scheme '{other}'"
            )));
        }
    };
    let host = url
        .host_str()
        .ok_or_else(|| Error::Configuration(format!("base url '{base_url}' has no host")))?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(format!("{scheme}://{authority}/{workspace_token}"))
}

/// Owns the inbound half of the socket. Routes replies to their waiters,
/// drops unsolicited frames, and on exit fails every pending waiter so no
/// caller hangs on a dead socket.
async fn read_loop(mut source: WsSource, pending: PendingTable, alive: Arc<AtomicBool>) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => dispatch_frame(&pending, text.as_str()).await,
            Ok(WsMessage::Close(_)) => {
                tracing::info!("socket closed by peer");
                break;
            }
            // Pings are answered by tungstenite itself; binary frames are
            // not part of the protocol.
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "socket read failed");
                break;
            }
        }
    }
    alive.store(false, Ordering::Relaxed);
    reject_all(&pending, "session socket closed").await;
}

/// Routes one inbound frame. Malformed frames are logged and ignored — they
/// must not fail a pending waiter.
async fn dispatch_frame(pending: &Mutex<HashMap<u64, oneshot::Sender<Result<Value, Error>>>>, raw: &str) {
    let Ok(frame) = serde_json::from_str::<Value>(raw) else {
        tracing::warn!("ignoring malformed socket frame");
        return;
    };
    let Some(id) = frame.get("id").and_then(Value::as_u64) else {
        tracing::debug!("dropping unsolicited push frame");
        return;
    };
    let Some(waiter) = pending.lock().await.remove(&id) else {
        tracing::debug!(id, "dropping late reply with no waiter");
        return;
    };
    let outcome = match frame.get("error") {
        Some(error) => Err(Error::Api(error.clone())),
        None => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
    };
    // A waiter that already timed out dropped its receiver; nothing to do.
    let _ = waiter.send(outcome);
}

async fn reject_all(
    pending: &Mutex<HashMap<u64, oneshot::Sender<Result<Value, Error>>>>,
    reason: &str,
) {
    let waiters: Vec<_> = pending.lock().await.drain().collect();
    for (id, waiter) in waiters {
        tracing::debug!(id, "failing pending call: {reason}");
        let _ = waiter.send(Err(Error::Transport(reason.to_string())));
    }
}

/// The remote API answers `findAll` with one of several envelope shapes
/// depending on version: a bare array, `{value: [...]}`, or `{docs: [...]}`.
/// Every call site goes through this one normalization.
pub fn extract_list(raw: Value) -> Vec<Value> {
    match raw {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            for key in ["value", "docs"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return items;
                }
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatch_routes_result_to_the_matching_waiter() {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(7, tx);

        dispatch_frame(&pending, r#"{"id": 7, "result": {"ok": true}}"#).await;

        let reply = rx.await.expect("waiter should be settled");
        assert_eq!(reply.expect("result frame"), json!({"ok": true}));
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_rejects_waiter_on_error_frame() {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(3, tx);

        dispatch_frame(&pending, r#"{"id": 3, "error": {"code": "denied"}}"#).await;

        let err = rx
            .await
            .expect("waiter should be settled")
            .expect_err("error frame");
        assert_eq!(err.code(), "platform_error");
    }

    #[tokio::test]
    async fn late_unsolicited_and_malformed_frames_leave_waiters_alone() {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx, mut rx) = oneshot::channel();
        pending.lock().await.insert(1, tx);

        dispatch_frame(&pending, "not json").await;
        dispatch_frame(&pending, r#"{"result": "push with no id"}"#).await;
        dispatch_frame(&pending, r#"{"id": 99, "result": "nobody waits"}"#).await;

        assert!(rx.try_recv().is_err(), "waiter must still be pending");
        assert_eq!(pending.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn reject_all_fails_every_pending_waiter_with_transport() {
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        pending.lock().await.insert(1, tx_a);
        pending.lock().await.insert(2, tx_b);

        reject_all(&pending, "socket gone").await;

        for rx in [rx_a, rx_b] {
            let err = rx
                .await
                .expect("waiter should be settled")
                .expect_err("transport rejection");
            assert_eq!(err.code(), "transport_failed");
        }
        assert!(pending.lock().await.is_empty());
    }

    #[test]
    fn extract_list_accepts_the_known_envelope_variants() {
        assert_eq!(extract_list(json!([1, 2])), vec![json!(1), json!(2)]);
        assert_eq!(extract_list(json!({"value": [1]})), vec![json!(1)]);
        assert_eq!(extract_list(json!({"docs": [1]})), vec![json!(1)]);
        assert!(extract_list(json!({"other": [1]})).is_empty());
        assert!(extract_list(json!("scalar")).is_empty());
    }

    #[test]
    fn socket_url_maps_scheme_and_keeps_port() {
        assert_eq!(
            socket_url("https://app.example.com", "tok").expect("url"),
            "wss://app.example.com/tok"
        );
        assert_eq!(
            socket_url("http://localhost:8087/", "tok").expect("url"),
            "ws://localhost:8087/tok"
        );
        assert!(socket_url("ftp://x", "tok").is_err());
    }
}
