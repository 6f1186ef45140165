// ============================
// supportchat-backend-lib/src/storage/sqlite.rs
// ============================
//! SQLite store backed by a single connection.
//!
//! Transactions are opened with `BEGIN IMMEDIATE` while the connection lock
//! is held, so at most one transaction is in flight per store. Statements
//! run on the blocking pool so a slow disk does not stall runtime workers.
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use supportchat_common::{MessageId, RoomId, UserType};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task;
use tracing::{info, warn};

use super::{
    JoinedRoomRecord, MessageRecord, NewMessage, NewRoom, RoomRecord, Store, Transaction,
};
use crate::error::AppError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        created_at TEXT NOT NULL,
        archived_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_rooms_owner ON rooms(owner);
    CREATE TABLE IF NOT EXISTS joined_rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        room_id INTEGER NOT NULL REFERENCES rooms(id)
    );
    CREATE INDEX IF NOT EXISTS idx_joined_rooms_room ON joined_rooms(room_id);
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id INTEGER NOT NULL REFERENCES rooms(id),
        sender TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        user_type INTEGER NOT NULL,
        body TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_room ON messages(room_id, timestamp);
";

const ROOM_COLUMNS: &str = "id, owner, created_at, archived_at";
const MESSAGE_COLUMNS: &str = "id, room_id, sender, timestamp, user_type, body";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "opened sqlite store");
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn Transaction>, AppError> {
        let mut tx = SqliteTransaction {
            conn: Some(self.conn.clone().lock_owned().await),
            done: false,
        };
        tx.run(|conn| {
            // A call cancelled mid-statement leaves its transaction behind
            if !conn.is_autocommit() {
                warn!("rolling back transaction left open by a cancelled call");
                conn.execute_batch("ROLLBACK")?;
            }
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(())
        })
        .await?;
        Ok(Box::new(tx))
    }
}

/// Owns the connection lock while open. The guard is lent to a blocking
/// task for every statement and handed back when it finishes.
struct SqliteTransaction {
    conn: Option<OwnedMutexGuard<Connection>>,
    done: bool,
}

impl SqliteTransaction {
    async fn run<T, F>(&mut self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AppError> + Send + 'static,
    {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| AppError::Internal("sqlite transaction lost its connection".into()))?;
        let (conn, result) = task::spawn_blocking(move || {
            let result = op(&conn);
            (conn, result)
        })
        .await
        .map_err(|e| AppError::Internal(format!("sqlite task failed: {e}")))?;
        self.conn = Some(conn);
        result
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Some(conn) = self.conn.take() else {
            return;
        };
        let rollback = move || {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback failed");
            }
        };
        // The lock travels with the closure, so nobody begins before it ends
        match Handle::try_current() {
            Ok(handle) => {
                let _ = handle.spawn_blocking(rollback);
            },
            Err(_) => rollback(),
        }
    }
}

/// SQLite row ids are signed; larger ids cannot name a stored row
fn sql_id(id: RoomId) -> Option<i64> {
    i64::try_from(id.0).ok()
}

fn column_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    let raw: i64 = row.get(idx)?;
    u64::try_from(raw).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, raw))
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<RoomRecord> {
    Ok(RoomRecord {
        id: RoomId(column_id(row, 0)?),
        owner: row.get(1)?,
        created_at: row.get(2)?,
        archived_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let raw_type: i64 = row.get(4)?;
    let user_type = u8::try_from(raw_type)
        .ok()
        .and_then(UserType::from_u8)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(4, raw_type))?;
    Ok(MessageRecord {
        id: MessageId(column_id(row, 0)?),
        room_id: RoomId(column_id(row, 1)?),
        sender: row.get(2)?,
        timestamp: row.get(3)?,
        user_type,
        body: row.get(5)?,
    })
}

fn last_id(conn: &Connection) -> Result<u64, AppError> {
    let raw = conn.last_insert_rowid();
    u64::try_from(raw).map_err(|_| AppError::Internal(format!("negative rowid {raw}")))
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn insert_room(&mut self, room: NewRoom) -> Result<RoomRecord, AppError> {
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO rooms (owner, created_at) VALUES (?1, ?2)",
                params![room.owner, room.created_at],
            )?;
            Ok(RoomRecord {
                id: RoomId(last_id(conn)?),
                owner: room.owner,
                created_at: room.created_at,
                archived_at: None,
            })
        })
        .await
    }

    async fn insert_joined_room(
        &mut self,
        user_id: &str,
        room_id: RoomId,
    ) -> Result<JoinedRoomRecord, AppError> {
        let key = sql_id(room_id).ok_or(AppError::RoomNotFound)?;
        let user_id = user_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO joined_rooms (user_id, room_id) VALUES (?1, ?2)",
                params![user_id, key],
            )?;
            Ok(JoinedRoomRecord {
                id: last_id(conn)?,
                user_id,
                room_id,
            })
        })
        .await
    }

    async fn insert_message(&mut self, message: NewMessage) -> Result<MessageRecord, AppError> {
        let key = sql_id(message.room_id).ok_or(AppError::RoomNotFound)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO messages (room_id, sender, timestamp, user_type, body) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    key,
                    message.sender,
                    message.timestamp,
                    message.user_type.as_u8(),
                    message.body,
                ],
            )?;
            Ok(MessageRecord {
                id: MessageId(last_id(conn)?),
                room_id: message.room_id,
                sender: message.sender,
                timestamp: message.timestamp,
                user_type: message.user_type,
                body: message.body,
            })
        })
        .await
    }

    async fn select_room(&mut self, id: RoomId) -> Result<Option<RoomRecord>, AppError> {
        let Some(key) = sql_id(id) else {
            return Ok(None);
        };
        self.run(move |conn| {
            let mut stmt =
                conn.prepare_cached(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"))?;
            Ok(stmt.query_row(params![key], room_from_row).optional()?)
        })
        .await
    }

    async fn select_open_rooms(&mut self) -> Result<Vec<RoomRecord>, AppError> {
        self.run(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {ROOM_COLUMNS} FROM rooms WHERE archived_at IS NULL ORDER BY created_at DESC, id DESC"
            ))?;
            let rooms = stmt
                .query_map([], room_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rooms)
        })
        .await
    }

    async fn select_messages(&mut self, room_id: RoomId) -> Result<Vec<MessageRecord>, AppError> {
        let Some(key) = sql_id(room_id) else {
            return Ok(Vec::new());
        };
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = ?1 ORDER BY timestamp, id"
            ))?;
            let messages = stmt
                .query_map(params![key], message_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn select_joined_rooms(
        &mut self,
        room_id: RoomId,
    ) -> Result<Vec<JoinedRoomRecord>, AppError> {
        let Some(key) = sql_id(room_id) else {
            return Ok(Vec::new());
        };
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, user_id, room_id FROM joined_rooms WHERE room_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![key], |row| {
                    Ok(JoinedRoomRecord {
                        id: column_id(row, 0)?,
                        user_id: row.get(1)?,
                        room_id: RoomId(column_id(row, 2)?),
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn count_open_rooms(&mut self, owner: &str) -> Result<u64, AppError> {
        let owner = owner.to_string();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM rooms WHERE owner = ?1 AND archived_at IS NULL",
                params![owner],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    async fn joined_room_exists(
        &mut self,
        user_id: &str,
        room_id: RoomId,
    ) -> Result<bool, AppError> {
        let Some(key) = sql_id(room_id) else {
            return Ok(false);
        };
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM joined_rooms WHERE user_id = ?1 AND room_id = ?2 LIMIT 1",
                    params![user_id, key],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn update_room_archived(
        &mut self,
        id: RoomId,
        archived_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let Some(key) = sql_id(id) else {
            return Ok(false);
        };
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE rooms SET archived_at = ?1 WHERE id = ?2",
                params![archived_at, key],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        self.run(|conn| Ok(conn.execute_batch("COMMIT")?)).await?;
        self.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests as shared;

    #[tokio::test]
    async fn test_create_and_select() {
        shared::create_and_select(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_rollback_on_drop() {
        shared::rollback_on_drop(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_archive_and_ordering() {
        shared::archive_and_ordering(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_messages_in_time_order() {
        shared::messages_in_time_order(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_duplicate_memberships_are_kept() {
        shared::duplicate_memberships_are_kept(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_visible_then_undone() {
        shared::uncommitted_writes_are_visible_then_undone(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test]
    async fn test_out_of_range_ids_are_absent() {
        shared::out_of_range_ids_are_absent(&SqliteStore::in_memory().unwrap()).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_keep_one_open_room() {
        shared::concurrent_creates_keep_one_open_room(Arc::new(SqliteStore::in_memory().unwrap())).await;
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        let store = SqliteStore::open(&path).unwrap();
        let mut tx = store.begin().await.unwrap();
        let room = tx
            .insert_room(NewRoom {
                owner: "owner".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        tx.insert_message(NewMessage {
            room_id: room.id,
            sender: "owner".into(),
            timestamp: Utc::now(),
            user_type: UserType::Support,
            body: "persisted".into(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        drop(store);

        let store = SqliteStore::open(&path).unwrap();
        let mut tx = store.begin().await.unwrap();
        let messages = tx.select_messages(room.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "persisted");
        assert_eq!(messages[0].user_type, UserType::Support);
    }
}
