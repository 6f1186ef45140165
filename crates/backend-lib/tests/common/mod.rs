//! Shared helpers for the integration tests: an in-process server on an
//! ephemeral port and a small JSON-RPC WebSocket client.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use supportchat_backend_lib::error::AppError;
use supportchat_backend_lib::storage::{MemoryStore, Store, Transaction};
use supportchat_backend_lib::{config::Settings, ws_router, AppState};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

/// Application state over a fresh in-memory store
pub fn test_state(settings: Settings) -> Arc<AppState> {
    state_with_store(settings, Arc::new(MemoryStore::new()))
}

pub fn state_with_store(settings: Settings, store: Arc<dyn Store>) -> Arc<AppState> {
    Arc::new(AppState::new(settings, store).expect("state"))
}

/// In-memory store whose first transaction waits until the gate is opened
pub struct GatedStore {
    inner: MemoryStore,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
    /// Signalled once the first transaction is waiting
    pub entered: Notify,
}

impl GatedStore {
    pub fn new() -> (Arc<Self>, oneshot::Sender<()>) {
        let (open, gate) = oneshot::channel();
        let store = Arc::new(Self {
            inner: MemoryStore::new(),
            gate: Mutex::new(Some(gate)),
            entered: Notify::new(),
        });
        (store, open)
    }
}

#[async_trait]
impl Store for GatedStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            self.entered.notify_one();
            let _ = gate.await;
        }
        self.inner.begin().await
    }
}

/// Serve the router on 127.0.0.1 with an OS-assigned port
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let app = ws_router::create_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });
    addr
}

/// `name=value` part of a `Set-Cookie` header
pub fn cookie_pair(set_cookie: &str) -> String {
    set_cookie
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}

pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    notifications: VecDeque<Value>,
    /// Session cookie handed out on upgrade
    pub session_cookie: String,
}

impl WsClient {
    /// Connect to `/chat/ws` sending `cookies` (may be empty)
    pub async fn connect(addr: SocketAddr, cookies: &str) -> Self {
        let mut request = format!("ws://{addr}/chat/ws")
            .into_client_request()
            .expect("request");
        if !cookies.is_empty() {
            request
                .headers_mut()
                .insert(header::COOKIE, cookies.parse().expect("cookie header"));
        }

        let (stream, response) = timeout(WAIT, tokio_tungstenite::connect_async(request))
            .await
            .expect("connect timed out")
            .expect("connect");
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .expect("upgrade sets the session cookie")
            .to_str()
            .expect("ascii cookie");

        Self {
            stream,
            next_id: 1,
            notifications: VecDeque::new(),
            session_cookie: cookie_pair(set_cookie),
        }
    }

    pub async fn send_raw(&mut self, frame: &str) {
        self.stream
            .send(Message::text(frame.to_string()))
            .await
            .expect("send");
    }

    pub async fn next_frame(&mut self) -> Value {
        loop {
            let message = timeout(WAIT, self.stream.next())
                .await
                .expect("no frame before timeout")
                .expect("connection closed")
                .expect("read");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("json frame");
            }
        }
    }

    /// Issue a call and wait for its response, stashing notifications seen meanwhile
    pub async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.send_raw(&request.to_string()).await;

        loop {
            let frame = self.next_frame().await;
            if frame.get("id") == Some(&json!(id)) {
                return frame;
            }
            if frame.get("method").is_some() {
                self.notifications.push_back(frame);
            }
        }
    }

    /// Result member of a successful call
    pub async fn result(&mut self, method: &str, params: Value) -> Value {
        let response = self.call(method, params).await;
        assert!(
            response.get("error").is_none(),
            "{method} failed: {response}"
        );
        response["result"].clone()
    }

    pub async fn next_notification(&mut self) -> Value {
        if let Some(frame) = self.notifications.pop_front() {
            return frame;
        }
        loop {
            let frame = self.next_frame().await;
            if frame.get("method").is_some() {
                return frame;
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
