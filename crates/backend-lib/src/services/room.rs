// ============================
// supportchat-backend-lib/src/services/room.rs
// ============================
//! The `room` namespace: creation, support join, archival, listing and the
//! new-room subscription.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::BoxStream;
use metrics::counter;
use serde_json::Value;
use supportchat_common::{NoParams, Room, RoomId, RoomParams};
use tracing::{debug, info};

use super::find_room;
use crate::auth::Identity;
use crate::error::AppError;
use crate::events::RoomEvents;
use crate::metrics::{ROOM_ARCHIVED, ROOM_CREATED};
use crate::rpc::{MethodEntry, Params, Reply, Service};
use crate::storage::{NewRoom, Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMethod {
    Create,
    Join,
    Archive,
    List,
    NewRooms,
}

const METHODS: &[MethodEntry<RoomMethod>] = &[
    MethodEntry::call("Create", RoomMethod::Create),
    MethodEntry::call("Join", RoomMethod::Join),
    MethodEntry::call("Archive", RoomMethod::Archive),
    MethodEntry::call("List", RoomMethod::List),
    MethodEntry::subscription("NewRooms", RoomMethod::NewRooms),
];

pub struct RoomService {
    store: Arc<dyn Store>,
    events: RoomEvents,
}

impl RoomService {
    pub fn new(store: Arc<dyn Store>, events: RoomEvents) -> Self {
        Self { store, events }
    }

    /// Open a room owned by the caller. An owner may hold one open room.
    pub async fn create(&self, identity: &Identity) -> Result<RoomId, AppError> {
        let mut tx = self.store.begin().await?;
        if tx.count_open_rooms(&identity.session_id).await? > 0 {
            return Err(AppError::TooManyOpenRooms);
        }

        let room = tx
            .insert_room(NewRoom {
                owner: identity.session_id.clone(),
                created_at: Utc::now(),
            })
            .await?;
        tx.insert_joined_room(&identity.session_id, room.id).await?;
        tx.commit().await?;

        counter!(ROOM_CREATED).increment(1);
        let subscribers = self.events.publish(room.id);
        info!(room_id = %room.id, owner = %identity.session_id, subscribers, "room created");
        Ok(room.id)
    }

    /// Add a support member to an existing room
    pub async fn join(&self, identity: &Identity, room_id: RoomId) -> Result<bool, AppError> {
        if !identity.support {
            return Err(AppError::NotAllowed);
        }

        let mut tx = self.store.begin().await?;
        let room = find_room(tx.as_mut(), room_id).await?;
        tx.insert_joined_room(&identity.session_id, room.id).await?;
        tx.commit().await?;

        info!(room_id = %room.id, member = %identity.session_id, "support joined room");
        Ok(true)
    }

    /// Close a room for good. Members only; participants may only close
    /// their own rooms.
    pub async fn archive(&self, identity: &Identity, room_id: RoomId) -> Result<bool, AppError> {
        let mut tx = self.store.begin().await?;
        let room = find_room(tx.as_mut(), room_id).await?;

        if !tx.joined_room_exists(&identity.session_id, room.id).await? {
            return Err(AppError::NotRoomMember);
        }
        if !identity.support && room.owner != identity.session_id {
            return Err(AppError::NotRoomOwner);
        }
        if room.is_archived() {
            return Err(AppError::AlreadyArchived);
        }

        tx.update_room_archived(room.id, Utc::now()).await?;
        tx.commit().await?;

        counter!(ROOM_ARCHIVED).increment(1);
        info!(room_id = %room.id, by = %identity.session_id, "room archived");
        Ok(true)
    }

    /// Open rooms, newest first
    pub async fn list(&self, identity: &Identity) -> Result<Vec<Room>, AppError> {
        if !identity.support {
            return Err(AppError::NotAllowed);
        }

        let mut tx = self.store.begin().await?;
        let rooms = tx.select_open_rooms().await?;
        Ok(rooms.iter().map(|room| room.to_wire()).collect())
    }

    /// Stream of ids of rooms created from now on
    pub fn new_rooms(&self, identity: &Identity) -> Result<BoxStream<'static, Value>, AppError> {
        if !identity.support {
            return Err(AppError::NotAllowed);
        }
        debug!(session = %identity.session_id, "new-room subscription requested");
        Ok(self.events.stream())
    }
}

#[async_trait]
impl Service for RoomService {
    type Method = RoomMethod;
    const NAMESPACE: &'static str = "room";

    fn methods() -> &'static [MethodEntry<RoomMethod>] {
        METHODS
    }

    async fn call(
        &self,
        method: RoomMethod,
        identity: Identity,
        params: Params,
    ) -> Result<Reply, AppError> {
        match method {
            RoomMethod::Create => {
                params.parse::<NoParams>()?;
                Reply::value(&self.create(&identity).await?)
            },
            RoomMethod::Join => {
                let params: RoomParams = params.parse()?;
                Reply::value(&self.join(&identity, params.room_id).await?)
            },
            RoomMethod::Archive => {
                let params: RoomParams = params.parse()?;
                Reply::value(&self.archive(&identity, params.room_id).await?)
            },
            RoomMethod::List => {
                params.parse::<NoParams>()?;
                Reply::value(&self.list(&identity).await?)
            },
            RoomMethod::NewRooms => {
                params.parse::<NoParams>()?;
                Ok(Reply::Subscribe(self.new_rooms(&identity)?))
            },
        }
    }
}
