// =============================================================================
// WebSocket Handler — hub subscriber pumps
// =============================================================================
//
// Clients connect to `/api/v1/ws` and receive every envelope the hub
// broadcasts, starting with the `connection` greeting. Per connection:
//
//   - Write side: drains the hub queue with a 10 s per-message deadline and
//     pings every 54 s. If the hub closes the queue (back-pressure drop) or
//     a write times out, the connection ends.
//   - Read side: any frame refreshes the liveness deadline. `heartbeat`
//     envelopes are consumed, never forwarded. A peer silent past 60 s is
//     disconnected on the next ping tick.
//
// Cleanup always unregisters the subscriber from the hub.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, timeout, Duration, Instant};
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::envelope::Envelope;

/// Keepalive ping cadence.
const PING_INTERVAL: Duration = Duration::from_secs(54);
/// How long the peer may stay silent before it is dropped.
const READ_DEADLINE: Duration = Duration::from_secs(60);
/// Per-message write deadline.
const WRITE_DEADLINE: Duration = Duration::from_secs(10);

// =============================================================================
// WebSocket upgrade handler
// =============================================================================

/// Axum handler for the WebSocket upgrade request.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

// =============================================================================
// Connection handler
// =============================================================================

/// Manages a single WebSocket connection lifecycle: registers with the hub,
/// then runs the write pump, the ping timer, and the read pump in one
/// `tokio::select!` loop until any side ends the connection.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    let (subscriber_id, mut outbound) = state.hub.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let mut ping_timer = interval(PING_INTERVAL);
    // The first tick fires immediately; that initial ping is harmless.
    let mut last_read = Instant::now();

    loop {
        tokio::select! {
            // ── Write pump: drain the hub queue ─────────────────────────
            payload = outbound.recv() => {
                match payload {
                    Some(payload) => {
                        match timeout(WRITE_DEADLINE, sender.send(Message::Text(payload))).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                debug!(subscriber_id = %subscriber_id, error = %e, "WebSocket send failed — disconnecting");
                                break;
                            }
                            Err(_) => {
                                warn!(subscriber_id = %subscriber_id, "WebSocket write deadline exceeded — disconnecting");
                                break;
                            }
                        }
                    }
                    // The hub dropped us (slow consumer) or is shutting down.
                    None => {
                        info!(subscriber_id = %subscriber_id, "hub closed outbound queue — disconnecting");
                        break;
                    }
                }
            }

            // ── Keepalive: ping and enforce the read deadline ───────────
            _ = ping_timer.tick() => {
                if last_read.elapsed() > READ_DEADLINE {
                    warn!(subscriber_id = %subscriber_id, "no pong within deadline — disconnecting");
                    break;
                }
                let ping = timeout(WRITE_DEADLINE, sender.send(Message::Ping(Vec::new())));
                match ping.await {
                    Ok(Ok(())) => debug!(subscriber_id = %subscriber_id, "keepalive ping sent"),
                    _ => {
                        debug!(subscriber_id = %subscriber_id, "keepalive ping failed — disconnecting");
                        break;
                    }
                }
            }

            // ── Read pump ───────────────────────────────────────────────
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_read = Instant::now();
                        state.hub.record_bytes_in(text.len());
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) if envelope.is_heartbeat() => {
                                // Acknowledged implicitly by the refreshed
                                // deadline; never forwarded.
                                debug!(subscriber_id = %subscriber_id, "heartbeat received");
                            }
                            Ok(envelope) => {
                                debug!(subscriber_id = %subscriber_id, kind = %envelope.kind, "client envelope ignored");
                            }
                            Err(e) => {
                                debug!(subscriber_id = %subscriber_id, error = %e, "unparseable client message ignored");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_read = Instant::now();
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            debug!(error = %e, "failed to send Pong — disconnecting");
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_read = Instant::now();
                        debug!(subscriber_id = %subscriber_id, "pong received");
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_read = Instant::now();
                        debug!("binary message ignored");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(subscriber_id = %subscriber_id, "close frame received");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(subscriber_id = %subscriber_id, error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    None => {
                        info!(subscriber_id = %subscriber_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unsubscribe(&subscriber_id);
    info!(subscriber_id = %subscriber_id, "WebSocket connection closed — cleanup complete");
}
