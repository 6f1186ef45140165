// ============================
// supportchat-backend-lib/src/storage.rs
// ============================
//! Storage abstraction over rooms, memberships and messages.
//!
//! All access goes through a [`Transaction`]. A transaction has exclusive
//! access to the store until it is committed or dropped, so check-then-act
//! sequences (one open room per owner, archive exactly once) hold under
//! concurrent callers. Dropping a transaction without committing rolls it back.
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use supportchat_common::{Message, MessageId, Room, RoomId, UserType};

use crate::error::AppError;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A support conversation
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    pub id: RoomId,
    /// Session id of the creator
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl RoomRecord {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Wire projection used by `room.List`
    pub fn to_wire(&self) -> Room {
        Room {
            id: self.id,
            created_at: self.created_at,
        }
    }
}

/// Membership of a session in a room
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRoomRecord {
    pub id: u64,
    pub user_id: String,
    pub room_id: RoomId,
}

/// One stored chat line
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub user_type: UserType,
    pub body: String,
}

impl MessageRecord {
    pub fn to_wire(&self) -> Message {
        Message {
            id: self.id,
            message: self.body.clone(),
            room_id: self.room_id,
            user_type: self.user_type,
            timestamp: self.timestamp,
        }
    }
}

/// Room about to be inserted
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

/// Message about to be inserted
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub user_type: UserType,
    pub body: String,
}

/// Trait for storage backends
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Start a serializable transaction
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError>;
}

/// Record primitives available inside a transaction
#[async_trait]
pub trait Transaction: Send {
    async fn insert_room(&mut self, room: NewRoom) -> Result<RoomRecord, AppError>;

    async fn insert_joined_room(
        &mut self,
        user_id: &str,
        room_id: RoomId,
    ) -> Result<JoinedRoomRecord, AppError>;

    async fn insert_message(&mut self, message: NewMessage) -> Result<MessageRecord, AppError>;

    async fn select_room(&mut self, id: RoomId) -> Result<Option<RoomRecord>, AppError>;

    /// Non-archived rooms, newest first
    async fn select_open_rooms(&mut self) -> Result<Vec<RoomRecord>, AppError>;

    /// Messages of a room, oldest first
    async fn select_messages(&mut self, room_id: RoomId) -> Result<Vec<MessageRecord>, AppError>;

    /// Memberships of a room in insertion order
    async fn select_joined_rooms(
        &mut self,
        room_id: RoomId,
    ) -> Result<Vec<JoinedRoomRecord>, AppError>;

    /// Number of non-archived rooms owned by `owner`
    async fn count_open_rooms(&mut self, owner: &str) -> Result<u64, AppError>;

    async fn joined_room_exists(&mut self, user_id: &str, room_id: RoomId)
        -> Result<bool, AppError>;

    /// Set `archived_at`; returns false when the room does not exist
    async fn update_room_archived(
        &mut self,
        id: RoomId,
        archived_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;
}
