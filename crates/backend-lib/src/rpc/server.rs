// ============================
// supportchat-backend-lib/src/rpc/server.rs
// ============================
//! Frame level JSON-RPC handling: parsing, batches, dispatch and encoding.
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use futures_util::FutureExt;
use metrics::counter;
use serde_json::Value;
use supportchat_common::jsonrpc::{Request, Response, UNSUBSCRIBE_SUFFIX, VERSION};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::params::UnsubscribeParams;
use super::{Notifier, Params, PendingSubscription, Registry, Reply};
use crate::auth::Identity;
use crate::error::AppError;
use crate::metrics::{RPC_CALLS, RPC_ERRORS, RPC_PANICS};

/// Encoded reply to one inbound frame
#[derive(Debug)]
pub struct Outgoing {
    pub body: String,
    /// Subscriptions to activate once `body` has been queued
    pub pending: Vec<PendingSubscription>,
}

enum Dispatched {
    Value(Value),
    Subscribed(PendingSubscription),
}

/// Transport independent JSON-RPC server
#[derive(Clone)]
pub struct RpcServer {
    registry: Arc<Registry>,
    call_timeout: Duration,
}

impl RpcServer {
    pub fn new(registry: Registry, call_timeout: Duration) -> Self {
        Self {
            registry: Arc::new(registry),
            call_timeout,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle one inbound frame. `notifier` is present on duplex transports
    /// only. Returns `None` when nothing needs to be written back.
    pub async fn handle_frame(
        &self,
        identity: &Identity,
        frame: &str,
        notifier: Option<&Notifier>,
    ) -> Option<Outgoing> {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "unparseable rpc frame");
                let response = error_response(Value::Null, &AppError::Parse(e.to_string()));
                return Some(encode(&response, Vec::new()));
            },
        };

        match value {
            Value::Array(items) if items.is_empty() => {
                let err = AppError::InvalidRequest("empty batch".to_string());
                Some(encode(&error_response(Value::Null, &err), Vec::new()))
            },
            Value::Array(items) => {
                let results = join_all(
                    items
                        .into_iter()
                        .map(|item| self.handle_value(identity, item, notifier)),
                )
                .await;

                let mut responses = Vec::new();
                let mut pending = Vec::new();
                for (response, subscription) in results.into_iter().flatten() {
                    responses.push(response);
                    pending.extend(subscription);
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(encode(&responses, pending))
                }
            },
            single => self
                .handle_value(identity, single, notifier)
                .await
                .map(|(response, pending)| encode(&response, pending.into_iter().collect())),
        }
    }

    async fn handle_value(
        &self,
        identity: &Identity,
        value: Value,
        notifier: Option<&Notifier>,
    ) -> Option<(Response, Option<PendingSubscription>)> {
        let request: Request = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                let err = AppError::InvalidRequest(e.to_string());
                return Some((error_response(Value::Null, &err), None));
            },
        };
        if request.jsonrpc != VERSION {
            let err = AppError::InvalidRequest(format!("unsupported version {:?}", request.jsonrpc));
            return Some((error_response(request.id.unwrap_or(Value::Null), &err), None));
        }

        let Request {
            id, method, params, ..
        } = request;
        let outcome = self.dispatch(identity, &method, params, notifier).await;

        // Client notifications get no response; a subscription started by one
        // is dropped here, which ends it.
        let id = id?;
        Some(match outcome {
            Ok(Dispatched::Value(result)) => (Response::success(id, result), None),
            Ok(Dispatched::Subscribed(pending)) => (
                Response::success(id, Value::String(pending.id().to_string())),
                Some(pending),
            ),
            Err(err) => (error_response(id, &err), None),
        })
    }

    async fn dispatch(
        &self,
        identity: &Identity,
        method: &str,
        params: Option<Value>,
        notifier: Option<&Notifier>,
    ) -> Result<Dispatched, AppError> {
        if let Some(namespace) = method.strip_suffix(UNSUBSCRIBE_SUFFIX) {
            if self.registry.has_subscriptions(namespace) {
                let notifier = notifier.ok_or(AppError::NotificationsUnsupported)?;
                let params: UnsubscribeParams = Params::new(params).parse()?;
                let removed = notifier.unsubscribe(namespace, &params.subscription);
                debug!(subscription = %params.subscription, removed, "unsubscribe");
                return Ok(Dispatched::Value(Value::Bool(removed)));
            }
        }

        let route = self
            .registry
            .route(method)
            .ok_or_else(|| AppError::MethodNotFound(method.to_string()))?;
        counter!(RPC_CALLS, "method" => method.to_string()).increment(1);
        debug!(method, session = %identity.session_id, "rpc call");

        let call = route.invoke(identity.clone(), Params::new(params));
        let reply = match timeout(self.call_timeout, AssertUnwindSafe(call).catch_unwind()).await {
            Err(_) => {
                warn!(method, timeout = ?self.call_timeout, "rpc call timed out");
                Err(AppError::Timeout)
            },
            Ok(Err(panic)) => {
                counter!(RPC_PANICS).increment(1);
                error!(method, panic = %panic_message(panic.as_ref()), "rpc handler panicked");
                Err(AppError::Internal(format!("handler for {method} panicked")))
            },
            Ok(Ok(result)) => result,
        };

        let reply = reply.inspect_err(|err| {
            counter!(RPC_ERRORS, "method" => method.to_string()).increment(1);
            if err.is_infrastructure() {
                error!(method, error = %err, "rpc call failed");
            } else {
                debug!(method, error = %err, "rpc call rejected");
            }
        })?;

        match reply {
            Reply::Value(value) => Ok(Dispatched::Value(value)),
            Reply::Subscribe(stream) => {
                let notifier = notifier.ok_or(AppError::NotificationsUnsupported)?;
                Ok(Dispatched::Subscribed(notifier.subscribe(route.namespace, stream)))
            },
        }
    }
}

fn error_response(id: Value, err: &AppError) -> Response {
    let object = err.to_error_object();
    Response::failure(id, object.code, object.message)
}

fn encode<T: serde::Serialize>(body: &T, pending: Vec<PendingSubscription>) -> Outgoing {
    let body = serde_json::to_string(body).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode rpc response");
        format!(
            r#"{{"jsonrpc":"2.0","id":null,"error":{{"code":{},"message":"internal error"}}}}"#,
            supportchat_common::jsonrpc::INTERNAL_ERROR
        )
    });
    Outgoing { body, pending }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
