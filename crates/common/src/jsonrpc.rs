//! JSON-RPC 2.0 envelopes exchanged over the WebSocket and the legacy HTTP endpoint.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Protocol version carried by every envelope
pub const VERSION: &str = "2.0";

/// Invalid JSON was received
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist, or push is unavailable on this transport
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters
pub const INVALID_PARAMS: i64 = -32602;
/// Internal server error
pub const INTERNAL_ERROR: i64 = -32603;
/// Application-level failure reported by a handler
pub const SERVER_ERROR: i64 = -32000;

/// Suffix of the method name used for subscription notifications
pub const SUBSCRIPTION_SUFFIX: &str = "_subscription";
/// Suffix of the method name used to cancel a subscription
pub const UNSUBSCRIBE_SUFFIX: &str = "_unsubscribe";

/// Inbound call. A missing `id` marks a client notification, while an
/// explicit `null` id still expects a response.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl Request {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Whether the caller expects no response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Error member of a failed response
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply correlated to a request by `id`
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Payload of a subscription notification
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SubscriptionResult {
    pub subscription: String,
    pub result: Value,
}

/// Server push frame, not correlated to any request id
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: SubscriptionResult,
}

impl Notification {
    pub fn new(namespace: &str, subscription: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            method: format!("{namespace}{SUBSCRIPTION_SUFFIX}"),
            params: SubscriptionResult {
                subscription: subscription.into(),
                result,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_id_is_a_notification_but_null_is_not() {
        let notification: Request =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "room.List"})).unwrap();
        assert!(notification.is_notification());

        let null_id: Request =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": null, "method": "room.List"}))
                .unwrap();
        assert_eq!(null_id.id, Some(Value::Null));
        assert!(!null_id.is_notification());
    }

    #[test]
    fn response_serializes_only_the_relevant_member() {
        let ok = serde_json::to_value(Response::success(json!(1), json!("5"))).unwrap();
        assert_eq!(ok, json!({"jsonrpc": "2.0", "id": 1, "result": "5"}));

        let err = serde_json::to_value(Response::failure(Value::Null, PARSE_ERROR, "parse error"))
            .unwrap();
        assert_eq!(
            err,
            json!({"jsonrpc": "2.0", "id": null, "error": {"code": -32700, "message": "parse error"}})
        );
    }

    #[test]
    fn notification_method_is_namespaced() {
        let n = Notification::new("room", "0xabc", json!("3"));
        let value = serde_json::to_value(n).unwrap();
        assert_eq!(value["method"], "room_subscription");
        assert_eq!(value["params"]["subscription"], "0xabc");
        assert_eq!(value["params"]["result"], "3");
    }
}
