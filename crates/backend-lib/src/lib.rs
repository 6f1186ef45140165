// ============================
// supportchat-backend-lib/src/lib.rs
// ============================
//! Core of the support-chat backend: anonymous cookie sessions, a JSON-RPC
//! 2.0 server over WebSocket and HTTP, and the room lifecycle behind it.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod rpc;
pub mod services;
pub mod storage;
pub mod websocket;
pub mod ws_router;

use std::sync::Arc;

use tracing::info;

use crate::auth::{SessionResolver, TokenCodec};
use crate::config::{Settings, StorageSettings};
use crate::error::AppError;
use crate::events::RoomEvents;
use crate::rpc::RpcServer;
use crate::storage::{MemoryStore, SqliteStore, Store};

/// Application state shared across all handlers
pub struct AppState {
    /// Settings manager
    pub settings: Arc<Settings>,
    /// Cookie session resolver
    pub sessions: SessionResolver,
    /// JSON-RPC dispatcher with every service registered
    pub rpc: RpcServer,
    /// New-room event hub
    pub events: RoomEvents,
    /// Storage backend
    pub store: Arc<dyn Store>,
}

impl AppState {
    /// Create a new application state
    pub fn new(settings: Settings, store: Arc<dyn Store>) -> Result<Self, AppError> {
        settings.validate()?;

        let codec = Arc::new(TokenCodec::from_secret(settings.session.secret.as_deref()));
        let sessions = SessionResolver::new(codec, settings.session.clone());
        let events = RoomEvents::default();
        let registry = services::registry(store.clone(), events.clone())?;
        info!(methods = ?registry.methods(), "rpc services registered");
        let rpc = RpcServer::new(registry, settings.call_timeout());

        Ok(Self {
            settings: Arc::new(settings),
            sessions,
            rpc,
            events,
            store,
        })
    }
}

/// Open the store selected in the configuration
pub fn open_store(settings: &StorageSettings) -> Result<Arc<dyn Store>, AppError> {
    Ok(match settings {
        StorageSettings::Memory => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        },
        StorageSettings::Sqlite { path } => Arc::new(SqliteStore::open(path)?),
    })
}
