// ============================
// supportchat-backend-lib/src/rpc/mod.rs
// ============================
//! JSON-RPC 2.0 dispatch shared by the WebSocket and plain HTTP transports.
//!
//! Services register a namespace and a static method table once at start-up.
//! A method is then addressed as `"<namespace>.<Method>"` and invoked with the
//! caller's [`Identity`] and its raw params.
pub mod params;
pub mod registry;
pub mod server;
pub mod subscription;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use crate::auth::Identity;
use crate::error::AppError;

pub use params::{FromParams, Params};
pub use registry::{Registry, RegistryBuilder};
pub use server::{Outgoing, RpcServer};
pub use subscription::{Notifier, PendingSubscription};

/// How a method answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Returns a single value
    Call,
    /// Returns a stream pushed as notifications
    Subscription,
}

/// One row of a service's static method table
#[derive(Debug, Clone, Copy)]
pub struct MethodEntry<M> {
    pub name: &'static str,
    pub kind: MethodKind,
    pub method: M,
}

impl<M> MethodEntry<M> {
    pub const fn call(name: &'static str, method: M) -> Self {
        Self {
            name,
            kind: MethodKind::Call,
            method,
        }
    }

    pub const fn subscription(name: &'static str, method: M) -> Self {
        Self {
            name,
            kind: MethodKind::Subscription,
            method,
        }
    }
}

/// What a handler produced
pub enum Reply {
    Value(Value),
    Subscribe(BoxStream<'static, Value>),
}

impl Reply {
    pub fn value<T: Serialize>(value: &T) -> Result<Self, AppError> {
        Ok(Reply::Value(serde_json::to_value(value)?))
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Reply::Subscribe(_) => f.write_str("Subscribe(..)"),
        }
    }
}

/// A group of RPC methods under one namespace
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Closed set of methods this service answers
    type Method: Copy + Send + Sync + 'static;

    const NAMESPACE: &'static str;

    fn methods() -> &'static [MethodEntry<Self::Method>];

    async fn call(
        &self,
        method: Self::Method,
        identity: Identity,
        params: Params,
    ) -> Result<Reply, AppError>;
}
