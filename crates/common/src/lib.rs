// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between support-chat clients and the server.
//! This module defines the RPC payload shapes and the JSON-RPC envelopes that carry them.

pub mod jsonrpc;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when an id string is not a decimal number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError(pub String);

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid id: {:?}", self.0)
    }
}

impl std::error::Error for ParseIdError {}

/// Numeric store ids travel as decimal strings so clients with 53-bit
/// numbers never lose precision. Integers are still accepted on input.
macro_rules! decimal_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<u64>()
                    .map($name)
                    .map_err(|_| ParseIdError(s.to_string()))
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                $name(value)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(DecimalIdVisitor).map($name)
            }
        }
    };
}

struct DecimalIdVisitor;

impl<'de> Visitor<'de> for DecimalIdVisitor {
    type Value = u64;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal id string or a non-negative integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u64, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u64, E> {
        u64::try_from(v).map_err(|_| E::custom(format!("invalid id: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u64, E> {
        v.trim()
            .parse::<u64>()
            .map_err(|_| E::custom(format!("invalid id: {v:?}")))
    }
}

decimal_id!(
    /// Identifier of a support conversation
    RoomId
);
decimal_id!(
    /// Identifier of a single chat line
    MessageId
);

/// Who wrote a message, derived from the sender's support capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserType {
    /// An ordinary visitor
    #[default]
    Participant,
    /// Support personnel
    Support,
}

impl UserType {
    pub fn from_support(support: bool) -> Self {
        if support {
            UserType::Support
        } else {
            UserType::Participant
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            UserType::Participant => 0,
            UserType::Support => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(UserType::Participant),
            1 => Some(UserType::Support),
            _ => None,
        }
    }
}

impl Serialize for UserType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for UserType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        UserType::from_u8(raw).ok_or_else(|| de::Error::custom(format!("unknown user type {raw}")))
    }
}

/// A chat line as returned by `chat.Send` and `chat.History`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub message: String,
    pub room_id: RoomId,
    pub user_type: UserType,
    pub timestamp: DateTime<Utc>,
}

/// Room projection returned by `room.List`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub created_at: DateTime<Utc>,
}

/// Parameters of `chat.Send`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
    pub room_id: RoomId,
    pub message: String,
}

/// Parameters of every method addressing a single room
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoomParams {
    pub room_id: RoomId,
}

/// Methods without parameters
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct NoParams {}
