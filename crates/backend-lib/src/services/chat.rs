// ============================
// supportchat-backend-lib/src/services/chat.rs
// ============================
//! The `chat` namespace.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use supportchat_common::{Message, RoomId, RoomParams, SendParams, UserType};
use tracing::debug;

use super::find_room;
use crate::auth::Identity;
use crate::error::AppError;
use crate::metrics::MESSAGE_SENT;
use crate::rpc::{MethodEntry, Params, Reply, Service};
use crate::storage::{NewMessage, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMethod {
    Send,
    History,
}

const METHODS: &[MethodEntry<ChatMethod>] = &[
    MethodEntry::call("Send", ChatMethod::Send),
    MethodEntry::call("History", ChatMethod::History),
];

pub struct ChatService {
    store: Arc<dyn Store>,
}

impl ChatService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append a message to a room on behalf of the caller
    pub async fn send(
        &self,
        identity: &Identity,
        room_id: RoomId,
        body: String,
    ) -> Result<Message, AppError> {
        let mut tx = self.store.begin().await?;
        let room = find_room(tx.as_mut(), room_id).await?;
        let message = tx
            .insert_message(NewMessage {
                room_id: room.id,
                sender: identity.session_id.clone(),
                timestamp: Utc::now(),
                user_type: UserType::from_support(identity.support),
                body,
            })
            .await?;
        tx.commit().await?;

        counter!(MESSAGE_SENT).increment(1);
        debug!(room_id = %room.id, message_id = %message.id, "message stored");
        Ok(message.to_wire())
    }

    /// Every message of a room in time order
    pub async fn history(&self, room_id: RoomId) -> Result<Vec<Message>, AppError> {
        let mut tx = self.store.begin().await?;
        let room = find_room(tx.as_mut(), room_id).await?;
        let messages = tx.select_messages(room.id).await?;
        Ok(messages.iter().map(|m| m.to_wire()).collect())
    }
}

#[async_trait]
impl Service for ChatService {
    type Method = ChatMethod;
    const NAMESPACE: &'static str = "chat";

    fn methods() -> &'static [MethodEntry<ChatMethod>] {
        METHODS
    }

    async fn call(
        &self,
        method: ChatMethod,
        identity: Identity,
        params: Params,
    ) -> Result<Reply, AppError> {
        match method {
            ChatMethod::Send => {
                let params: SendParams = params.parse()?;
                Reply::value(&self.send(&identity, params.room_id, params.message).await?)
            },
            ChatMethod::History => {
                let params: RoomParams = params.parse()?;
                Reply::value(&self.history(params.room_id).await?)
            },
        }
    }
}
