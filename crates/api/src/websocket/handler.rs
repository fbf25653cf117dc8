//! WebSocket handler for Axum
//!
//! Upgrades the HTTP connection, runs a writer task fed by the connection's
//! bounded queue, and processes inbound signals one at a time so a `join` is
//! fully applied before the next signal from the same connection.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::StreamExt, SinkExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

use super::{
    connection::Connection,
    events::{ClientEvent, ServerEvent},
    state::RelayState,
};

/// WebSocket handler - upgrades HTTP connection to WebSocket
///
/// Identity is asserted later by the client's `join` signal and trusted for
/// the lifetime of the connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<AppState>) -> Response {
    if app_state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let settings = SocketSettings {
        outbound_capacity: app_state.config.ws_outbound_queue_capacity,
        ping_interval: app_state.config.ws_ping_interval(),
        idle_timeout: app_state.config.ws_idle_timeout(),
    };
    let relay = app_state.relay.clone();
    let shutdown = app_state.shutdown.clone();
    let token = shutdown.token();

    ws.on_upgrade(move |socket| shutdown.track(handle_socket(socket, relay, settings, token)))
}

/// Per-socket transport settings
#[derive(Debug, Clone, Copy)]
struct SocketSettings {
    outbound_capacity: usize,
    ping_interval: Duration,
    idle_timeout: Option<Duration>,
}

/// Handle individual WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    relay: RelayState,
    settings: SocketSettings,
    shutdown: CancellationToken,
) {
    let (mut sender, mut receiver) = socket.split();

    // Bounded queue so a slow client only ever loses its own frames
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(settings.outbound_capacity);

    let conn = relay
        .add_connection(Connection::new(tx, relay.default_room()))
        .await;
    let connection_id = conn.connection_id;

    // Spawn task to send events and keepalive pings to the client
    let ping_interval = settings.ping_interval;
    let send_task = tokio::spawn(async move {
        let mut ping = interval_at(Instant::now() + ping_interval, ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if sender.send(Message::Text(json)).await.is_err() {
                                break; // Connection closed
                            }
                        }
                        Err(e) => {
                            tracing::error!(error = ?e, event = event.name(), "Failed to serialize WebSocket event");
                        }
                    }
                }
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Handle incoming messages
    loop {
        let read = async {
            match settings.idle_timeout {
                Some(idle) => tokio::time::timeout(idle, receiver.next()).await.ok(),
                None => Some(receiver.next().await),
            }
        };

        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(connection_id = %connection_id, "Closing WebSocket for server shutdown");
                break;
            }
            read = read => match read {
                Some(next) => next,
                None => {
                    tracing::info!(
                        connection_id = %connection_id,
                        idle_secs = settings.idle_timeout.map(|d| d.as_secs()).unwrap_or_default(),
                        "Closing idle WebSocket connection"
                    );
                    break;
                }
            },
        };

        let msg = match next {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        };

        match msg {
            Message::Text(text) => handle_text(&relay, &conn, &text).await,
            Message::Close(_) => {
                tracing::info!(connection_id = %connection_id, "WebSocket close frame received");
                break;
            }
            // Pongs and pings only refresh the idle timer; axum answers pings itself
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Binary(_) => {
                tracing::debug!(connection_id = %connection_id, "Ignoring binary frame");
            }
        }
    }

    // Cleanup on disconnect
    tracing::info!(connection_id = %connection_id, "WebSocket connection closing");
    relay.disconnect(&connection_id).await;

    send_task.abort();
}

/// Parse and dispatch one text frame. Malformed frames are logged and dropped
/// without any reply to the sender.
async fn handle_text(relay: &RelayState, conn: &Arc<Connection>, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => relay.handle_signal(conn, event).await,
        Err(e) => {
            tracing::warn!(
                connection_id = %conn.connection_id,
                error = %e,
                "Ignoring malformed client signal"
            );
        }
    }
}
