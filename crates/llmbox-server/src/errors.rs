//! Server error types.
//!
//! Two families reach clients differently:
//! - [`ProtocolError`] closes the connection with no reply
//! - [`ReplyError`] becomes `{success: false, error: "<display>"}` and the
//!   connection survives

use std::net::SocketAddr;

use thiserror::Error;

/// Inbound traffic the broker refuses to interpret. Always fatal to the
/// connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("bad JSON: {0}")]
    InvalidJson(String),

    #[error("envelope is not an object")]
    NotAnObject,

    #[error("missing cid")]
    MissingCid,

    #[error("invalid cid: must be a 32 character hex string")]
    InvalidCid,

    #[error("unknown message kind {0:?}")]
    UnknownKind(String),

    #[error("invalid {kind} content: {reason}")]
    InvalidContent { kind: &'static str, reason: String },

    #[error("chat without starting or resuming a session")]
    ChatWithoutSession,

    #[error("chat data is not valid base64 text")]
    InvalidPayload,
}

/// Request-level failures reported in the reply body.
///
/// `Display` is the exact wire string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplyError {
    #[error("expired")]
    Expired,

    #[error("not found")]
    NotFound,

    #[error("fraud")]
    Fraud,

    #[error("still processing prior request")]
    Busy,

    #[error("model is still initializing")]
    Initializing,

    #[error("initializing models")]
    CatalogNotReady,

    #[error("type must be 'text'")]
    NotText,

    #[error("invalid setting {0}")]
    InvalidSetting(String),

    #[error("unknown model {0}")]
    UnknownModel(String),

    #[error("engine failure: {0}")]
    Engine(String),
}

/// Startup failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("invalid listen address {0}")]
    Address(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub(crate) fn bind(addr: &SocketAddr, source: std::io::Error) -> Self {
        Self::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}
