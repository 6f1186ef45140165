// ============================
// supportchat-backend-lib/src/rpc/registry.rs
// ============================
//! Method routing table, written once at start-up and read-only afterwards.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::debug;

use super::{MethodKind, Params, Reply, Service};
use crate::auth::Identity;
use crate::error::AppError;

type Handler =
    Arc<dyn Fn(Identity, Params) -> BoxFuture<'static, Result<Reply, AppError>> + Send + Sync>;

/// A registered method
#[derive(Clone)]
pub struct Route {
    pub namespace: &'static str,
    pub kind: MethodKind,
    handler: Handler,
}

impl Route {
    /// Start the handler; the returned future owns everything it needs
    pub fn invoke(
        &self,
        identity: Identity,
        params: Params,
    ) -> BoxFuture<'static, Result<Reply, AppError>> {
        (self.handler)(identity, params)
    }
}

/// Immutable `"<namespace>.<Method>"` routing table
pub struct Registry {
    routes: HashMap<String, Route>,
    subscription_namespaces: HashSet<&'static str>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn route(&self, method: &str) -> Option<&Route> {
        self.routes.get(method)
    }

    /// Whether `<namespace>_unsubscribe` is served
    pub fn has_subscriptions(&self, namespace: &str) -> bool {
        self.subscription_namespaces.contains(namespace)
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    routes: HashMap<String, Route>,
    subscription_namespaces: HashSet<&'static str>,
}

impl RegistryBuilder {
    /// Add every method of `service` under its namespace
    pub fn register<S: Service>(mut self, service: Arc<S>) -> Result<Self, AppError> {
        let namespace = S::NAMESPACE;
        if !is_namespace(namespace) {
            return Err(AppError::Registration(format!(
                "invalid namespace {namespace:?}"
            )));
        }

        for entry in S::methods() {
            if !is_method_name(entry.name) {
                return Err(AppError::Registration(format!(
                    "invalid method name {:?} in namespace {namespace}",
                    entry.name
                )));
            }

            let full_name = format!("{namespace}.{}", entry.name);
            if self.routes.contains_key(&full_name) {
                return Err(AppError::Registration(format!("duplicate route {full_name}")));
            }

            let service = service.clone();
            let method = entry.method;
            let handler: Handler = Arc::new(move |identity, params| {
                let service = service.clone();
                Box::pin(async move { service.call(method, identity, params).await })
            });

            if entry.kind == MethodKind::Subscription {
                self.subscription_namespaces.insert(namespace);
            }
            debug!(method = %full_name, kind = ?entry.kind, "registered rpc method");
            self.routes.insert(
                full_name,
                Route {
                    namespace,
                    kind: entry.kind,
                    handler,
                },
            );
        }

        Ok(self)
    }

    pub fn build(self) -> Registry {
        Registry {
            routes: self.routes,
            subscription_namespaces: self.subscription_namespaces,
        }
    }
}

/// Lowercase identifier; `_` and `.` are reserved as separators
fn is_namespace(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn is_method_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric())
}
