// ============================
// supportchat-backend-lib/src/storage/memory.rs
// ============================
//! Process-local store. Suitable for tests and single-node deployments that
//! do not need history to survive a restart.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use supportchat_common::{MessageId, RoomId};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::{
    JoinedRoomRecord, MessageRecord, NewMessage, NewRoom, RoomRecord, Store, Transaction,
};
use crate::error::AppError;

#[derive(Debug, Default)]
struct Tables {
    rooms: Vec<RoomRecord>,
    joined_rooms: Vec<JoinedRoomRecord>,
    messages: Vec<MessageRecord>,
    next_room_id: u64,
    next_joined_room_id: u64,
    next_message_id: u64,
}

impl Tables {
    fn next_id(counter: &mut u64) -> u64 {
        *counter += 1;
        *counter
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::InsertRoom => {
                self.rooms.pop();
                self.next_room_id -= 1;
            },
            Undo::InsertJoinedRoom => {
                self.joined_rooms.pop();
                self.next_joined_room_id -= 1;
            },
            Undo::InsertMessage => {
                self.messages.pop();
                self.next_message_id -= 1;
            },
            Undo::Archive { index, previous } => {
                if let Some(room) = self.rooms.get_mut(index) {
                    room.archived_at = previous;
                }
            },
        }
    }
}

/// Inverse of one write, replayed newest first on rollback
#[derive(Debug)]
enum Undo {
    InsertRoom,
    InsertJoinedRoom,
    InsertMessage,
    Archive {
        index: usize,
        previous: Option<DateTime<Utc>>,
    },
}

/// In-memory implementation of the Store trait
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let tables = self.tables.clone().lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            tables,
            undo: Vec::new(),
        }))
    }
}

/// Holds the table lock for its whole lifetime and writes in place. Each
/// write records its inverse; dropping without commit replays them.
struct MemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    undo: Vec<Undo>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            debug!(writes = self.undo.len(), "rolling back memory transaction");
        }
        while let Some(undo) = self.undo.pop() {
            self.tables.revert(undo);
        }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn insert_room(&mut self, room: NewRoom) -> Result<RoomRecord, AppError> {
        let record = RoomRecord {
            id: RoomId(Tables::next_id(&mut self.tables.next_room_id)),
            owner: room.owner,
            created_at: room.created_at,
            archived_at: None,
        };
        self.tables.rooms.push(record.clone());
        self.undo.push(Undo::InsertRoom);
        Ok(record)
    }

    async fn insert_joined_room(
        &mut self,
        user_id: &str,
        room_id: RoomId,
    ) -> Result<JoinedRoomRecord, AppError> {
        let record = JoinedRoomRecord {
            id: Tables::next_id(&mut self.tables.next_joined_room_id),
            user_id: user_id.to_string(),
            room_id,
        };
        self.tables.joined_rooms.push(record.clone());
        self.undo.push(Undo::InsertJoinedRoom);
        Ok(record)
    }

    async fn insert_message(&mut self, message: NewMessage) -> Result<MessageRecord, AppError> {
        let record = MessageRecord {
            id: MessageId(Tables::next_id(&mut self.tables.next_message_id)),
            room_id: message.room_id,
            sender: message.sender,
            timestamp: message.timestamp,
            user_type: message.user_type,
            body: message.body,
        };
        self.tables.messages.push(record.clone());
        self.undo.push(Undo::InsertMessage);
        Ok(record)
    }

    async fn select_room(&mut self, id: RoomId) -> Result<Option<RoomRecord>, AppError> {
        Ok(self.tables.rooms.iter().find(|r| r.id == id).cloned())
    }

    async fn select_open_rooms(&mut self) -> Result<Vec<RoomRecord>, AppError> {
        let mut rooms: Vec<RoomRecord> = self
            .tables
            .rooms
            .iter()
            .filter(|r| !r.is_archived())
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rooms)
    }

    async fn select_messages(&mut self, room_id: RoomId) -> Result<Vec<MessageRecord>, AppError> {
        let mut messages: Vec<MessageRecord> = self
            .tables
            .messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        Ok(messages)
    }

    async fn select_joined_rooms(
        &mut self,
        room_id: RoomId,
    ) -> Result<Vec<JoinedRoomRecord>, AppError> {
        Ok(self
            .tables
            .joined_rooms
            .iter()
            .filter(|j| j.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn count_open_rooms(&mut self, owner: &str) -> Result<u64, AppError> {
        Ok(self
            .tables
            .rooms
            .iter()
            .filter(|r| r.owner == owner && !r.is_archived())
            .count() as u64)
    }

    async fn joined_room_exists(
        &mut self,
        user_id: &str,
        room_id: RoomId,
    ) -> Result<bool, AppError> {
        Ok(self
            .tables
            .joined_rooms
            .iter()
            .any(|j| j.user_id == user_id && j.room_id == room_id))
    }

    async fn update_room_archived(
        &mut self,
        id: RoomId,
        archived_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some(index) = self.tables.rooms.iter().position(|r| r.id == id) else {
            return Ok(false);
        };
        let previous = self.tables.rooms[index].archived_at.replace(archived_at);
        self.undo.push(Undo::Archive { index, previous });
        Ok(true)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        self.undo.clear();
        Ok(())
    }
}
