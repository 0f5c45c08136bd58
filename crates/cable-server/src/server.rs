//! HTTP surface: upgrade route, health, and metrics.
//!
//! `/cable` upgrades to a WebSocket after the Origin allow-list check.
//! Authentication happens on the socket, before any protocol traffic; an
//! unauthenticated peer receives only a close frame with the reason. The
//! socket is split once: a writer task drains the connection's outbound
//! queue while the read loop feeds frames to the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{ConnectInfo, FromRequestParts, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::metrics::{
    WS_AUTH_FAILURES_TOTAL, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
    WS_ORIGIN_REJECTS_TOTAL,
};
use crate::websocket::channels::HandlerDeps;
use crate::websocket::connection::{Connection, RequestMeta};
use crate::websocket::handler::Dispatcher;
use crate::websocket::hub::Hub;
use crate::websocket::protocol::Reply;

/// Shared state behind every route.
#[derive(Clone)]
pub struct AppState {
    /// Central channel registry and broadcaster.
    pub hub: Arc<Hub>,
    /// Credential resolution and scope validation.
    pub authenticator: Arc<dyn Authenticator>,
    /// Collaborators injected into channel handlers.
    pub deps: HandlerDeps,
    /// Subsystem tunables.
    pub config: Arc<ServerConfig>,
    /// Handle rendering the `/metrics` endpoint.
    pub metrics: PrometheusHandle,
}

/// Build the router: `/cable` (upgrade), `/health`, `/metrics`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cable", get(upgrade))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "active_channels": state.hub.count(),
    }))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

/// The origin allow-list gates the request before the upgrade handshake is
/// even attempted, so the extraction is done by hand rather than in the
/// handler signature.
async fn upgrade(State(state): State<AppState>, req: Request<Body>) -> Response {
    let (mut parts, _body) = req.into_parts();
    let remote_addr = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let meta = RequestMeta::from_request(&parts.headers, remote_addr, parts.uri.query());

    if !state.config.origin_allowed(meta.origin.as_deref()) {
        counter!(WS_ORIGIN_REJECTS_TOTAL).increment(1);
        warn!(origin = ?meta.origin, "upgrade rejected by origin allow-list");
        return StatusCode::FORBIDDEN.into_response();
    }

    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, meta))
}

/// Drive one accepted socket to completion.
async fn handle_socket(socket: WebSocket, state: AppState, meta: RequestMeta) {
    counter!(WS_CONNECTIONS_TOTAL).increment(1);

    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let conn = Arc::new(Connection::new(meta, tx));
    let writer = tokio::spawn(write_loop(sink, rx, Arc::clone(&conn)));

    // Authentication gates all protocol traffic.
    match conn.connect(state.authenticator.as_ref()).await {
        Ok(user) => {
            info!(connection_id = %conn.id, user_id = user.id, "connection authenticated");
            let _ = conn.send(Arc::new(Reply::Welcome.to_json()));
        }
        Err(_) => {
            counter!(WS_AUTH_FAILURES_TOTAL).increment(1);
            conn.log_payload().info("connection rejected: unauthorized");
            // Only the close control frame goes out, reason and all.
            conn.close_with_reason("Unauthorized");
            let _ = writer.await;
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            return;
        }
    }

    let mut dispatcher = Dispatcher::new(
        Arc::clone(&conn),
        Arc::clone(&state.hub),
        state.deps.clone(),
        Arc::clone(&state.authenticator),
        state.config.revalidation_interval,
    );

    let close_signal = conn.close_signal();
    loop {
        tokio::select! {
            () = close_signal.cancelled() => break,
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => dispatcher.dispatch(text.as_str()).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong/binary: nothing to dispatch
                Some(Err(err)) => {
                    debug!(connection_id = %conn.id, error = %err, "socket read failed");
                    break;
                }
            }
        }
    }

    dispatcher.shutdown().await;
    conn.close();
    let _ = writer.await;
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    conn.log_payload().info("connection closed");
}

/// Drain the outbound queue into the socket; on the close signal, flush
/// whatever is already queued, send a close frame carrying the
/// connection's close reason, and exit.
async fn write_loop(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Arc<String>>,
    conn: Arc<Connection>,
) {
    let close_signal = conn.close_signal();
    loop {
        tokio::select! {
            biased;
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if sink
                        .send(Message::Text(Utf8Bytes::from(frame.as_str())))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => break,
            },
            () = close_signal.cancelled() => {
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::NORMAL,
                        reason: Utf8Bytes::from_static(conn.close_reason()),
                    })))
                    .await;
                break;
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
