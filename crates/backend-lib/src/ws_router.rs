// ============================
// supportchat-backend-lib/src/ws_router.rs
// ============================
//! HTTP surface: the WebSocket endpoint, the legacy RPC endpoint, the support
//! cookie endpoint and the health check.
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::CorsSettings;
use crate::error::AppError;
use crate::websocket::handle_connection;
use crate::AppState;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let rpc = &state.settings.rpc;

    let mut chat = Router::new().route(
        "/ws",
        get(ws_handler).layer(TimeoutLayer::new(state.settings.handshake_timeout())),
    );
    if rpc.enable_http {
        chat = chat.route(
            "/rpc",
            post(http_rpc_handler).layer(DefaultBodyLimit::max(rpc.max_message_bytes)),
        );
    }
    if rpc.support_endpoint {
        chat = chat.route("/iamsupport", get(support_handler));
    }

    let mut router = Router::new()
        .nest("/chat", chat)
        .route("/healthz", get(health_handler))
        .layer(TraceLayer::new_for_http());
    if let Some(cors) = cors_layer(&state.settings.cors) {
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// Credentialed CORS for the configured origins; `None` when none are set
fn cors_layer(settings: &CorsSettings) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = settings
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid cors origin");
                None
            },
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
    )
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Resolve the session, upgrade, and hand the socket to the connection loop
async fn ws_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let session = state.sessions.resolve(&headers, &uri)?;
    let identity = session.identity;
    let max_message_bytes = state.settings.rpc.max_message_bytes;

    let mut response = ws
        .max_message_size(max_message_bytes)
        .on_failed_upgrade(|e| warn!(error = %e, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_connection(socket, state, identity));
    response
        .headers_mut()
        .append(header::SET_COOKIE, session.set_cookie);
    Ok(response)
}

/// Legacy single-shot RPC over plain HTTP; subscriptions are unavailable
async fn http_rpc_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    body: String,
) -> Result<Response, AppError> {
    let session = state.sessions.resolve(&headers, &uri)?;
    let outgoing = state
        .rpc
        .handle_frame(&session.identity, &body, None)
        .await;

    let body = outgoing.map(|out| out.body).unwrap_or_default();
    let mut response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response();
    response
        .headers_mut()
        .append(header::SET_COOKIE, session.set_cookie);
    Ok(response)
}

/// Operator endpoint granting the support capability to this browser
async fn support_handler(State(state): State<Arc<AppState>>) -> Result<Response, AppError> {
    let cookie = state.sessions.support_cookie(Utc::now())?;
    info!("support cookie issued");
    Ok(([(header::SET_COOKIE, cookie)], "OK\n").into_response())
}
