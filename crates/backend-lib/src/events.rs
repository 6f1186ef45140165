// ============================
// supportchat-backend-lib/src/events.rs
// ============================
//! In-process fan-out of newly created rooms to `room.NewRooms` subscribers.
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use supportchat_common::RoomId;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Buffered events per subscriber before the slowest one starts lagging
pub const EVENT_CAPACITY: usize = 100;

/// New-room event hub
#[derive(Clone)]
pub struct RoomEvents {
    tx: broadcast::Sender<RoomId>,
}

impl Default for RoomEvents {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl RoomEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Announce a committed room; returns how many subscribers saw it
    pub fn publish(&self, room_id: RoomId) -> usize {
        match self.tx.send(room_id) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(room_id = %room_id, "no new-room subscribers");
                0
            },
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Room ids created from now on, as decimal strings. The receiver is
    /// attached immediately, so nothing published after this call is missed.
    pub fn stream(&self) -> BoxStream<'static, Value> {
        let rx = self.tx.subscribe();
        stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(room_id) => return Some((Value::String(room_id.to_string()), rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "new-room subscriber lagged behind");
                    },
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
