// ==================
// crates/backend-lib/src/websocket.rs
// ==================
//! WebSocket connection loop.
//!
//! One reader, one writer. The reader parses every inbound frame and spawns
//! its dispatch onto a per-connection task set, so a slow call does not hold
//! up later frames. At most `rpc.max_in_flight` calls run at once; past that
//! the reader stops pulling frames until one finishes, so a client that stops
//! reading its responses is throttled instead of piling up tasks. Responses
//! and notifications share a bounded outbound queue drained by the single
//! writer task, which keeps writes to the socket serialized. When either side
//! goes away, every in-flight call and every subscription of the connection
//! is cancelled.
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::auth::Identity;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION};
use crate::rpc::{Notifier, Outgoing, RpcServer};
use crate::AppState;

/// Decrements the active connection gauge however the loop exits
struct ActiveConnection;

impl ActiveConnection {
    fn open() -> Self {
        counter!(WS_CONNECTION).increment(1);
        gauge!(WS_ACTIVE).increment(1.0);
        ActiveConnection
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        gauge!(WS_ACTIVE).decrement(1.0);
    }
}

/// Serve one upgraded connection until it closes
pub async fn handle_connection(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let _active = ActiveConnection::open();
    info!(session = %identity.session_id, support = identity.support, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(state.settings.rpc.outbound_buffer);
    let notifier = Notifier::new(out_tx.clone());

    // Single writer: everything bound for the client goes through `out_tx`
    let mut writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                debug!(error = %e, "websocket write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    let in_flight = Arc::new(Semaphore::new(state.settings.rpc.max_in_flight));
    let mut calls = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut writer => {
                debug!(session = %identity.session_id, "writer stopped");
                break;
            }
            Some(finished) = calls.join_next(), if !calls.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        error!(error = %e, "rpc dispatch task panicked");
                    }
                }
            }
            // Permits are only taken here, so a free one is still free below
            incoming = stream.next(), if in_flight.available_permits() > 0 => {
                let frame = match incoming {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            debug!("ignoring non utf-8 binary frame");
                            continue;
                        },
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    // ping/pong are answered by the protocol layer
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(error = %e, "websocket read failed");
                        break;
                    },
                };

                let Ok(permit) = in_flight.clone().try_acquire_owned() else {
                    error!("in-flight limiter closed");
                    break;
                };
                calls.spawn(dispatch(
                    permit,
                    state.rpc.clone(),
                    identity.clone(),
                    notifier.clone(),
                    out_tx.clone(),
                    frame,
                ));
            }
        }
    }

    calls.abort_all();
    notifier.close();
    writer.abort();
    info!(session = %identity.session_id, "websocket disconnected");
}

async fn dispatch(
    _permit: OwnedSemaphorePermit,
    rpc: RpcServer,
    identity: Identity,
    notifier: Notifier,
    out: mpsc::Sender<String>,
    frame: String,
) {
    let Some(Outgoing { body, pending }) = rpc.handle_frame(&identity, &frame, Some(&notifier)).await
    else {
        return;
    };

    // Subscriptions start only once their id is on its way to the client
    if out.send(body).await.is_ok() {
        for subscription in pending {
            subscription.activate();
        }
    }
}
