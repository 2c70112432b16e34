//! # llmbox-server
//!
//! WebSocket broker for long-lived inference sessions.
//!
//! - Envelope codec and protocol dispatcher (`ping`, `system`, `session`, `chat`)
//! - Connection registry with per-connection session bindings
//! - Session store with lazy and periodic idle expiry
//! - Job admission: one in-flight prompt per session, bounded overall
//! - HTTP `/health` and graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod admission;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod health;
pub mod protocol;
pub mod reaper;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{ProtocolError, ReplyError, ServerError};
pub use server::BrokerServer;
pub use session::{Session, SessionState};
pub use state::BrokerState;
pub use store::SessionStore;
