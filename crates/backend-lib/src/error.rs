// crates/backend-lib/src/error.rs

//! Central error type + Axum and JSON-RPC integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use supportchat_common::jsonrpc::{
    ErrorObject, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
    SERVER_ERROR,
};
use thiserror::Error;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("the method {0} does not exist/is not available")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("invalid room id")]
    InvalidRoomId,

    #[error("notifications not supported")]
    NotificationsUnsupported,

    #[error("not allowed")]
    NotAllowed,

    #[error("room not found")]
    RoomNotFound,

    #[error("not member of given room")]
    NotRoomMember,

    #[error("can only interact with your own rooms")]
    NotRoomOwner,

    #[error("too many open rooms")]
    TooManyOpenRooms,

    #[error("already archived")]
    AlreadyArchived,

    #[error("request timed out")]
    Timeout,

    #[error("registration error: {0}")]
    Registration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Parse(_)
            | AppError::InvalidRequest(_)
            | AppError::InvalidParams(_)
            | AppError::InvalidRoomId
            | AppError::NotificationsUnsupported => StatusCode::BAD_REQUEST,
            AppError::MethodNotFound(_) | AppError::RoomNotFound => StatusCode::NOT_FOUND,
            AppError::NotAllowed | AppError::NotRoomMember | AppError::NotRoomOwner => {
                StatusCode::FORBIDDEN
            },
            AppError::TooManyOpenRooms | AppError::AlreadyArchived => StatusCode::CONFLICT,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i64 {
        match self {
            AppError::Parse(_) => PARSE_ERROR,
            AppError::InvalidRequest(_) => INVALID_REQUEST,
            AppError::MethodNotFound(_) | AppError::NotificationsUnsupported => METHOD_NOT_FOUND,
            AppError::InvalidParams(_) | AppError::InvalidRoomId => INVALID_PARAMS,
            AppError::Internal(_) | AppError::Registration(_) | AppError::Json(_) => {
                INTERNAL_ERROR
            },
            _ => SERVER_ERROR,
        }
    }

    /// Whether the failure is the server's fault rather than the caller's
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AppError::Database(_)
                | AppError::Internal(_)
                | AppError::Json(_)
                | AppError::Config(_)
                | AppError::Registration(_)
        )
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            AppError::Database(_) => "storage unavailable".to_string(),
            AppError::Internal(_) | AppError::Json(_) => "internal error".to_string(),
            AppError::Config(_) | AppError::Registration(_) => "server misconfigured".to_string(),
            other => other.to_string(),
        }
    }

    /// Message shown to RPC callers: detailed in development, sanitized in production
    pub fn client_message(&self) -> String {
        if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        }
    }

    /// JSON-RPC error member for this error
    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.rpc_code(),
            message: self.client_message(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = serde_json::json!({
            "error": {
                "code": self.rpc_code(),
                "message": self.client_message(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    #[test]
    fn test_domain_error_messages() {
        assert_eq!(AppError::NotAllowed.to_string(), "not allowed");
        assert_eq!(AppError::TooManyOpenRooms.to_string(), "too many open rooms");
        assert_eq!(AppError::AlreadyArchived.to_string(), "already archived");
        assert_eq!(
            AppError::NotRoomOwner.to_string(),
            "can only interact with your own rooms"
        );
        assert_eq!(
            AppError::NotificationsUnsupported.to_string(),
            "notifications not supported"
        );
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(AppError::Parse("x".into()).rpc_code(), PARSE_ERROR);
        assert_eq!(AppError::InvalidRequest("x".into()).rpc_code(), INVALID_REQUEST);
        assert_eq!(AppError::MethodNotFound("x".into()).rpc_code(), METHOD_NOT_FOUND);
        assert_eq!(AppError::InvalidParams("x".into()).rpc_code(), INVALID_PARAMS);
        assert_eq!(AppError::InvalidRoomId.rpc_code(), INVALID_PARAMS);
        assert_eq!(AppError::NotificationsUnsupported.rpc_code(), METHOD_NOT_FOUND);
        assert_eq!(AppError::Internal("x".into()).rpc_code(), INTERNAL_ERROR);
        assert_eq!(AppError::NotAllowed.rpc_code(), SERVER_ERROR);
        assert_eq!(AppError::RoomNotFound.rpc_code(), SERVER_ERROR);
        assert_eq!(AppError::Timeout.rpc_code(), SERVER_ERROR);
    }

    #[test]
    fn test_sanitized_messages_hide_infrastructure_detail() {
        let err = AppError::Database(rusqlite::Error::InvalidQuery);
        assert!(err.is_infrastructure());
        assert_eq!(err.sanitized_message(), "storage unavailable");

        // Caller-facing reasons are kept verbatim
        assert_eq!(AppError::NotAllowed.sanitized_message(), "not allowed");
        assert!(!AppError::NotAllowed.is_infrastructure());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::NotAllowed.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::RoomNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::AlreadyArchived.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_into_response_is_json() {
        let response = AppError::RoomNotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("application/json"));
    }
}
