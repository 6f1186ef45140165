// ============================
// supportchat-backend-lib/src/services/mod.rs
// ============================
//! RPC services: room lifecycle and chat messages.
pub mod chat;
pub mod room;

use std::sync::Arc;

use supportchat_common::RoomId;

use crate::error::AppError;
use crate::events::RoomEvents;
use crate::rpc::Registry;
use crate::storage::{RoomRecord, Store, Transaction};

pub use chat::{ChatMethod, ChatService};
pub use room::{RoomMethod, RoomService};

/// Registry serving the `room` and `chat` namespaces
pub fn registry(store: Arc<dyn Store>, events: RoomEvents) -> Result<Registry, AppError> {
    Ok(Registry::builder()
        .register(Arc::new(RoomService::new(store.clone(), events)))?
        .register(Arc::new(ChatService::new(store)))?
        .build())
}

async fn find_room(tx: &mut dyn Transaction, id: RoomId) -> Result<RoomRecord, AppError> {
    tx.select_room(id).await?.ok_or(AppError::RoomNotFound)
}
