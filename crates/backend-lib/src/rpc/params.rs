// ============================
// supportchat-backend-lib/src/rpc/params.rs
// ============================
//! Typed decoding of JSON-RPC `params`.
//!
//! Accepted shapes are a named object, a positional array zipped with the
//! method's field list, a one-element array wrapping an object, and an absent
//! or `null` member (decoded as an empty object).
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use supportchat_common::{NoParams, RoomId, RoomParams, SendParams};

use crate::error::AppError;

/// Params of a method with a fixed, ordered field list
pub trait FromParams: DeserializeOwned {
    /// Field names in positional order
    const FIELDS: &'static [&'static str];

    fn from_object(object: Map<String, Value>) -> Result<Self, AppError> {
        serde_json::from_value(Value::Object(object))
            .map_err(|e| AppError::InvalidParams(e.to_string()))
    }
}

/// Raw `params` member of a request
#[derive(Debug, Clone, Default)]
pub struct Params(Option<Value>);

impl Params {
    pub fn new(raw: Option<Value>) -> Self {
        Self(raw)
    }

    pub fn parse<T: FromParams>(self) -> Result<T, AppError> {
        let object = match self.0 {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(object)) => object,
            Some(Value::Array(items)) => positional::<T>(items)?,
            Some(other) => {
                return Err(AppError::InvalidParams(format!(
                    "params must be an object or an array, got {other}"
                )))
            },
        };
        T::from_object(object)
    }
}

fn positional<T: FromParams>(mut items: Vec<Value>) -> Result<Map<String, Value>, AppError> {
    if items.len() == 1 && items[0].is_object() {
        if let Some(Value::Object(object)) = items.pop() {
            return Ok(object);
        }
    }

    if items.len() > T::FIELDS.len() {
        return Err(AppError::InvalidParams(format!(
            "too many params: expected at most {}, got {}",
            T::FIELDS.len(),
            items.len()
        )));
    }

    Ok(T::FIELDS
        .iter()
        .map(|field| field.to_string())
        .zip(items)
        .collect())
}

/// Room ids are checked up front so a bad id reports as such
fn check_room_id(object: &Map<String, Value>) -> Result<(), AppError> {
    if let Some(raw) = object.get("roomId") {
        RoomId::deserialize(raw).map_err(|_| AppError::InvalidRoomId)?;
    }
    Ok(())
}

impl FromParams for NoParams {
    const FIELDS: &'static [&'static str] = &[];
}

impl FromParams for RoomParams {
    const FIELDS: &'static [&'static str] = &["roomId"];

    fn from_object(object: Map<String, Value>) -> Result<Self, AppError> {
        check_room_id(&object)?;
        serde_json::from_value(Value::Object(object))
            .map_err(|e| AppError::InvalidParams(e.to_string()))
    }
}

impl FromParams for SendParams {
    const FIELDS: &'static [&'static str] = &["roomId", "message"];

    fn from_object(object: Map<String, Value>) -> Result<Self, AppError> {
        check_room_id(&object)?;
        serde_json::from_value(Value::Object(object))
            .map_err(|e| AppError::InvalidParams(e.to_string()))
    }
}

/// Params of `<namespace>_unsubscribe`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeParams {
    pub subscription: String,
}

impl FromParams for UnsubscribeParams {
    const FIELDS: &'static [&'static str] = &["subscription"];
}
