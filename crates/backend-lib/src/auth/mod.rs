// ============================
// supportchat-backend-lib/src/auth/mod.rs
// ============================
//! Anonymous session identity: signed tokens and the cookie resolver built on them.

pub mod session;
pub mod token;

pub use session::{cookie_value, new_session_id, Identity, ResolvedSession, SessionResolver};
pub use token::{KeyError, TokenCodec, TokenError};
