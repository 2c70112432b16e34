//! WebSocket connection lifecycle: one client from upgrade through disconnect.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use llmbox_core::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::connection::{ClientConnection, Outbound};
use crate::dispatch;
use crate::protocol::{self, CLOSE_PROTOCOL_ERROR};
use crate::state::BrokerState;

/// How long the reader waits for the writer to flush after disconnect.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Run a WebSocket connection for a newly accepted client.
///
/// 1. Registers the connection and sends the message of the day
/// 2. Pushes the catalog if it is already ready
/// 3. Dispatches inbound frames sequentially
/// 4. Forwards outbound envelopes and periodic pings from a writer task
/// 5. Unregisters on disconnect, leaving sessions resumable
#[instrument(skip_all, fields(connection_id))]
pub async fn run_ws_session(ws: WebSocket, peer: SocketAddr, state: BrokerState) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let id = ConnectionId::next();
    let _ = tracing::Span::current().record("connection_id", tracing::field::display(id));
    let (send_tx, mut send_rx) = mpsc::channel::<Outbound>(state.config.max_send_queue);
    let connection = Arc::new(ClientConnection::new(id, peer, send_tx));
    state.registry.register(Arc::clone(&connection));
    let connected_at = Instant::now();
    info!(%peer, "client connected");

    for line in &state.config.motd {
        let _ = connection.send_system(&protocol::text_notice(line));
    }
    if state.catalog.is_ready() && connection.claim_catalog_delivery() {
        let _ = connection.send_system(&protocol::models_push(&state.catalog.snapshot()));
    }

    // Outbound forwarder with periodic Ping frames.
    let ping_every = state.config.ping_interval();
    let client_timeout = state.config.client_timeout();
    let outbound_conn = Arc::clone(&connection);
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(ping_every);
        // Skip the immediate first tick
        let _ = ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    match frame {
                        Some(Outbound::Text(text)) => {
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Close { code, reason }) => {
                            let close = CloseFrame { code, reason: reason.into() };
                            let _ = ws_tx.send(Message::Close(Some(close))).await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if !outbound_conn.check_alive()
                        && outbound_conn.last_pong_elapsed() > client_timeout
                    {
                        warn!("client unresponsive for {client_timeout:?}, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            // Writer gone (close sent, peer dead or timed out).
            _ = &mut writer => break,
        };
        let Some(Ok(msg)) = msg else { break };
        connection.mark_alive();

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => {
                    warn!(len = data.len(), "non-UTF8 binary frame, closing");
                    let _ = connection.close(CLOSE_PROTOCOL_ERROR, "invalid frame");
                    break;
                }
            },
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        if let Err(e) = dispatch::handle_text(&state, &connection, &text) {
            warn!(error = %e, "protocol violation, closing");
            let _ = connection.close(CLOSE_PROTOCOL_ERROR, e.to_string());
            // Stop reading; the writer sends the close frame and exits.
            break;
        }
    }

    let _ = state.registry.unregister(id);
    if !writer.is_finished() {
        // Queued frames are flushed ahead of the close.
        let _ = connection.close(close_code::NORMAL, "");
        if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }
    }
    info!(
        duration_secs = connected_at.elapsed().as_secs(),
        "client disconnected"
    );
}
