//! Envelope codec.
//!
//! Every message in both directions is
//! `{ "msg": "ping"|"system"|"session"|"chat", "cid": "<32 hex>", "content": {...}|null }`.
//! Inbound envelopes are validated cid first: a missing, non-string or
//! malformed cid is rejected before the kind is looked at.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use llmbox_catalog::ModelDescriptor;
use llmbox_core::ids::is_hex_token;
use llmbox_core::{CorrelationId, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::{ProtocolError, ReplyError};

/// Close code for protocol violations.
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
/// Close code sent when the broker shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ping,
    System,
    Session,
    Chat,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::System => "system",
            Self::Session => "session",
            Self::Chat => "chat",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "ping" => Some(Self::Ping),
            "system" => Some(Self::System),
            "session" => Some(Self::Session),
            "chat" => Some(Self::Chat),
            _ => None,
        }
    }
}

/// A validated inbound envelope. `content` is `Null` when absent.
#[derive(Clone, Debug)]
pub struct Inbound {
    pub kind: MessageKind,
    pub cid: CorrelationId,
    pub content: Value,
}

/// Parse and validate one inbound text frame.
pub fn parse_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let Value::Object(mut obj) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let cid = match obj.get("cid") {
        None => return Err(ProtocolError::MissingCid),
        Some(Value::String(s)) if is_hex_token(s) => CorrelationId::from_raw(s.clone()),
        Some(_) => return Err(ProtocolError::InvalidCid),
    };

    let kind = match obj.get("msg") {
        Some(Value::String(s)) => {
            MessageKind::parse(s).ok_or_else(|| ProtocolError::UnknownKind(s.clone()))?
        }
        Some(other) => return Err(ProtocolError::UnknownKind(other.to_string())),
        None => return Err(ProtocolError::UnknownKind(String::new())),
    };

    let content = obj.remove("content").unwrap_or(Value::Null);
    Ok(Inbound { kind, cid, content })
}

// ── Typed content ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum SystemRequest {
    Models,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum SessionRequest {
    Create {
        #[serde(default)]
        settings: Option<Map<String, Value>>,
    },
    Resume {
        session_id: String,
    },
    Status {
        session_id: String,
    },
    Destroy {
        session_id: String,
    },
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    pub data: String,
}

/// Decode kind-specific content, mapping failures to a protocol violation.
pub fn decode_content<T: for<'de> Deserialize<'de>>(
    kind: MessageKind,
    content: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(content).map_err(|e| ProtocolError::InvalidContent {
        kind: kind.as_str(),
        reason: e.to_string(),
    })
}

// ── Outbound ────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Envelope<'a> {
    msg: MessageKind,
    cid: &'a CorrelationId,
    content: &'a Value,
}

/// Serialize an outbound envelope.
pub fn encode(kind: MessageKind, cid: &CorrelationId, content: &Value) -> String {
    let envelope = Envelope {
        msg: kind,
        cid,
        content,
    };
    // Serializing a `Value` tree with string keys cannot fail.
    serde_json::to_string(&envelope).unwrap_or_default()
}

pub fn encode_b64(text: &str) -> String {
    B64.encode(text.as_bytes())
}

/// Decode base64 chat data into UTF-8 text.
pub fn decode_b64(data: &str) -> Result<String, ProtocolError> {
    let bytes = B64.decode(data).map_err(|_| ProtocolError::InvalidPayload)?;
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidPayload)
}

/// `{success: false, error}` body for a session or system reply.
pub fn failure(err: &ReplyError) -> Value {
    json!({"success": false, "error": err.to_string()})
}

/// Administrative text notice (`system {type: "text"}`).
pub fn text_notice(text: &str) -> Value {
    json!({"type": "text", "data": encode_b64(text)})
}

/// Unsolicited catalog push (`system {type: "models"}`).
pub fn models_push(models: &[ModelDescriptor]) -> Value {
    json!({"type": "models", "data": models})
}

/// Chat reply body, successful or not.
pub fn chat_reply(session_id: &str, sender: &str, outcome: Result<&str, &ReplyError>) -> Value {
    let (success, error, data) = match outcome {
        Ok(text) => (true, Value::Null, Value::String(encode_b64(text))),
        Err(e) => (false, Value::String(e.to_string()), Value::Null),
    };
    json!({
        "success": success,
        "session_id": session_id,
        "error": error,
        "sender": sender,
        "bot": true,
        "type": "text",
        "data": data,
    })
}

/// Parse a wire session id, `None` if malformed.
pub fn parse_session_id(raw: &str) -> Option<SessionId> {
    SessionId::parse(raw)
}
