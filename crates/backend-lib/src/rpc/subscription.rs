// ============================
// supportchat-backend-lib/src/rpc/subscription.rs
// ============================
//! Server push for one duplex connection.
//!
//! A subscription stays dormant until its [`PendingSubscription`] is
//! activated, which the transport does only after the subscribe response has
//! been queued. Items produced in the meantime wait in the source stream.
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{AbortHandle, Abortable};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use metrics::gauge;
use serde_json::Value;
use supportchat_common::jsonrpc::Notification;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};
use uuid::Uuid;

use crate::metrics::SUBSCRIPTIONS_ACTIVE;

struct ActiveSubscription {
    namespace: &'static str,
    abort: AbortHandle,
}

/// Per-connection subscription table feeding the connection's outbound queue
#[derive(Clone)]
pub struct Notifier {
    out: mpsc::Sender<String>,
    active: Arc<DashMap<String, ActiveSubscription>>,
}

/// A subscription whose id has been assigned but which does not forward yet
#[derive(Debug)]
pub struct PendingSubscription {
    id: String,
    activate: oneshot::Sender<()>,
}

impl PendingSubscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start forwarding notifications
    pub fn activate(self) {
        let _ = self.activate.send(());
    }
}

/// Counts a forwarding task in the active gauge until it ends or is aborted
struct GaugeGuard;

impl GaugeGuard {
    fn new() -> Self {
        gauge!(SUBSCRIPTIONS_ACTIVE).increment(1.0);
        GaugeGuard
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
    }
}

impl Notifier {
    pub fn new(out: mpsc::Sender<String>) -> Self {
        Self {
            out,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Fresh subscription id: `0x` followed by 32 hex digits
    pub fn new_subscription_id() -> String {
        format!("0x{}", Uuid::new_v4().simple())
    }

    /// Register `stream` as a subscription of `namespace`
    pub fn subscribe(
        &self,
        namespace: &'static str,
        stream: BoxStream<'static, Value>,
    ) -> PendingSubscription {
        let id = Self::new_subscription_id();
        let (activate, activated) = oneshot::channel::<()>();
        let (abort, registration) = AbortHandle::new_pair();
        self.active
            .insert(id.clone(), ActiveSubscription { namespace, abort });

        let out = self.out.clone();
        let active = self.active.clone();
        let sub_id = id.clone();
        let forward = async move {
            if activated.await.is_err() {
                debug!(subscription = %sub_id, "subscription never activated");
                active.remove(&sub_id);
                return;
            }

            let _gauge = GaugeGuard::new();
            let mut stream = stream;
            while let Some(item) = stream.next().await {
                let frame = match serde_json::to_string(&Notification::new(
                    namespace,
                    sub_id.clone(),
                    item,
                )) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!(subscription = %sub_id, error = %e, "failed to encode notification");
                        continue;
                    },
                };
                if out.send(frame).await.is_err() {
                    break;
                }
            }
            debug!(subscription = %sub_id, "subscription finished");
            active.remove(&sub_id);
        };
        tokio::spawn(Abortable::new(forward, registration));

        PendingSubscription { id, activate }
    }

    /// Cancel a subscription of `namespace`; false when it is unknown
    pub fn unsubscribe(&self, namespace: &str, id: &str) -> bool {
        match self
            .active
            .remove_if(id, |_, sub| sub.namespace == namespace)
        {
            Some((_, sub)) => {
                sub.abort.abort();
                true
            },
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel every subscription; called when the connection goes away
    pub fn close(&self) {
        for entry in self.active.iter() {
            entry.value().abort.abort();
        }
        self.active.clear();
    }
}
