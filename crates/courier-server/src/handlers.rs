//! Connection handlers for the Courier server.
//!
//! This module handles the connection lifecycle and dispatches decoded
//! client events to the relay.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use courier_core::{ConnectionId, Relay, RelayConfig};
use courier_protocol::{codec, ClientEvent};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message relay.
    pub relay: Relay,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let relay_config = RelayConfig {
            broadcast_online_users: config.presence.broadcast_online_users,
        };

        Self {
            relay: Relay::with_config(relay_config),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Courier server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let connection_id = ConnectionId::generate();
    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Attach to the relay; outbound events arrive on this receiver.
    let mut outbound = state.relay.attach(&connection_id);

    // Event processing loop
    loop {
        tokio::select! {
            biased;

            // Deliver events enqueued by the relay
            Some(event) = outbound.recv() => {
                match codec::encode_server(&event) {
                    Ok(text) => {
                        metrics::record_message(text.len(), "outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(connection = %connection_id, error = %e, "Failed to encode event");
                        metrics::record_error("encode");
                    }
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics::record_message(text.len(), "inbound");

                        match codec::decode_client(&text) {
                            Ok(event) => handle_event(event, &connection_id, &state),
                            Err(e) => {
                                // Malformed input is absorbed, never fatal.
                                warn!(connection = %connection_id, error = %e, "Undecodable frame");
                                metrics::record_error("protocol");
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!(connection = %connection_id, "Ignoring binary frame");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Expected and abrupt teardown take the same path.
    state.relay.disconnect(&connection_id);
    metrics::set_online_users(state.relay.stats().online_users);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Dispatch a decoded client event to the relay.
fn handle_event(event: ClientEvent, connection_id: &ConnectionId, state: &AppState) {
    match event {
        ClientEvent::Join(user_id) => {
            debug!(connection = %connection_id, user = %user_id, "Join request");
            state.relay.join(&user_id, connection_id);
            metrics::set_online_users(state.relay.stats().online_users);
        }

        ClientEvent::Leave(user_id) => {
            debug!(connection = %connection_id, user = %user_id, "Leave request");
            state.relay.leave(&user_id, connection_id);
            metrics::set_online_users(state.relay.stats().online_users);
        }

        ClientEvent::Message(envelope) => {
            let receiver_id = envelope.receiver_id.clone();
            let emitted = state.relay.route(envelope, connection_id);
            metrics::record_delivery(emitted);

            debug!(
                connection = %connection_id,
                receiver = %receiver_id,
                emitted,
                "Routed message"
            );
        }
    }
}
