// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const RPC_CALLS: &str = "rpc.calls";
pub const RPC_ERRORS: &str = "rpc.errors";
pub const RPC_PANICS: &str = "rpc.panics";
pub const SUBSCRIPTIONS_ACTIVE: &str = "rpc.subscriptions.active";
pub const SESSION_MINTED: &str = "session.minted";
pub const SESSION_RESUMED: &str = "session.resumed";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_ARCHIVED: &str = "room.archived";
pub const MESSAGE_SENT: &str = "chat.message.sent";
