//! WebSocket client connection state.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use llmbox_core::{ConnectionId, CorrelationId, SessionId};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::{self, MessageKind};

/// Close frame payloads are limited to 125 bytes, two of them the code.
const MAX_CLOSE_REASON: usize = 123;

/// Frames queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// A connected WebSocket client.
pub struct ClientConnection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    /// Send channel to the client's WebSocket write task.
    tx: mpsc::Sender<Outbound>,
    /// Sessions this connection created or resumed.
    sessions: Mutex<HashSet<SessionId>>,
    /// Whether the model catalog has been delivered to this client.
    catalog_sent: AtomicBool,
    pub connected_at: Instant,
    /// Whether the client has responded since the last ping.
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to full channel.
    dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, peer: SocketAddr, tx: mpsc::Sender<Outbound>) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            tx,
            sessions: Mutex::new(HashSet::new()),
            catalog_sent: AtomicBool::new(false),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    // ── Session bindings ──

    /// Bind a session. Returns `false` if it was already bound.
    pub fn bind_session(&self, id: SessionId) -> bool {
        self.sessions.lock().insert(id)
    }

    pub fn unbind_session(&self, id: &SessionId) -> bool {
        self.sessions.lock().remove(id)
    }

    pub fn owns(&self, id: &SessionId) -> bool {
        self.sessions.lock().contains(id)
    }

    pub fn has_sessions(&self) -> bool {
        !self.sessions.lock().is_empty()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.lock().iter().cloned().collect()
    }

    /// Drop every binding. Sessions themselves stay in the store.
    pub fn release_sessions(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let n = sessions.len();
        sessions.clear();
        n
    }

    // ── Catalog delivery ──

    /// Mark the catalog as delivered. Returns `true` only the first time.
    pub fn claim_catalog_delivery(&self) -> bool {
        !self.catalog_sent.swap(true, Ordering::AcqRel)
    }

    pub fn catalog_sent(&self) -> bool {
        self.catalog_sent.load(Ordering::Acquire)
    }

    // ── Outbound ──

    /// Queue a frame for the writer task.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, frame: Outbound) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Encode and queue an envelope.
    pub fn send_envelope(&self, kind: MessageKind, cid: &CorrelationId, content: &Value) -> bool {
        self.send(Outbound::Text(protocol::encode(kind, cid, content)))
    }

    /// Queue a `system` envelope with a fresh correlation token.
    pub fn send_system(&self, content: &Value) -> bool {
        self.send_envelope(MessageKind::System, &CorrelationId::new(), content)
    }

    /// Ask the writer to send a close frame and stop.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> bool {
        let mut reason = reason.into();
        truncate_utf8(&mut reason, MAX_CLOSE_REASON);
        self.send(Outbound::Close { code, reason })
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    // ── Liveness ──

    /// Mark the connection as alive (pong or any frame received).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag. `true` if alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
}
