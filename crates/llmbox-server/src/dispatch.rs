//! Protocol dispatcher: routes one validated envelope to its handler.
//!
//! Each connection calls [`handle_text`] sequentially from its reader loop.
//! Returning `Err` means the frame was a protocol violation and the caller
//! must close the connection without replying.

use std::sync::Arc;

use llmbox_core::settings::DEFAULT_NAME;
use llmbox_core::{CorrelationId, EngineSettings, PromptTemplate, SessionId};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::connection::ClientConnection;
use crate::errors::{ProtocolError, ReplyError};
use crate::protocol::{
    self, ChatContent, Inbound, MessageKind, SessionRequest, SystemRequest,
};
use crate::state::BrokerState;

/// Parse, validate and handle one inbound text frame.
#[instrument(skip_all, fields(connection_id = %conn.id))]
pub fn handle_text(
    state: &BrokerState,
    conn: &Arc<ClientConnection>,
    text: &str,
) -> Result<(), ProtocolError> {
    let Inbound { kind, cid, content } = protocol::parse_inbound(text)?;
    debug!(msg = kind.as_str(), %cid, "inbound");

    match kind {
        MessageKind::Ping => {
            let _ = conn.send_envelope(MessageKind::Ping, &cid, &Value::Null);
            Ok(())
        }
        MessageKind::System => {
            match protocol::decode_content(kind, content)? {
                SystemRequest::Models => system_models(state, conn, &cid),
            }
            Ok(())
        }
        MessageKind::Session => {
            let request = protocol::decode_content(kind, content)?;
            let reply = match request {
                SessionRequest::Create { settings } => {
                    session_create(state, conn, settings.unwrap_or_default())
                }
                SessionRequest::Resume { session_id } => session_resume(state, conn, &session_id),
                SessionRequest::Status { session_id } => session_status(state, &session_id),
                SessionRequest::Destroy { session_id } => session_destroy(state, conn, &session_id),
            };
            let body = reply.unwrap_or_else(|e| protocol::failure(&e));
            let _ = conn.send_envelope(MessageKind::Session, &cid, &body);
            Ok(())
        }
        MessageKind::Chat => chat(state, conn, cid, content),
    }
}

// ── System ──

fn system_models(state: &BrokerState, conn: &ClientConnection, cid: &CorrelationId) {
    let ready = state.catalog.is_ready();
    if ready {
        // A ready listing counts as catalog delivery for this connection.
        let _ = conn.claim_catalog_delivery();
    }
    let body = json!({
        "models": state.catalog.snapshot(),
        "ready": ready,
        "success": true,
        "error": Value::Null,
    });
    let _ = conn.send_envelope(MessageKind::System, cid, &body);
}

// ── Session ──

fn session_create(
    state: &BrokerState,
    conn: &ClientConnection,
    raw: Map<String, Value>,
) -> Result<Value, ReplyError> {
    if !state.catalog.is_ready() {
        return Err(ReplyError::CatalogNotReady);
    }
    let mut settings =
        EngineSettings::from_raw(&raw).map_err(|e| ReplyError::InvalidSetting(e.key))?;

    let descriptor = if settings.model.is_empty() {
        state.catalog.first()
    } else {
        state.catalog.find(&settings.model)
    }
    .ok_or_else(|| ReplyError::UnknownModel(settings.model.clone()))?;
    settings.model.clone_from(&descriptor.filename);

    let model_path = state.config.models_path.join(&descriptor.filename);
    let template = PromptTemplate::new(descriptor.system_prompt, descriptor.prompt_template);
    let session = state.store.create(
        state.config.max_idle_session(),
        model_path,
        state.config.model_threads,
        settings,
        template,
    );
    let _ = conn.bind_session(session.id.clone());
    session.set_current_connection(conn.id);
    info!(session_id = %session.id, model = %descriptor.name, "session bound to client");

    Ok(json!({
        "session_id": session.id,
        "expires": session.expires(),
        "success": true,
        "error": Value::Null,
    }))
}

fn session_resume(
    state: &BrokerState,
    conn: &ClientConnection,
    raw_id: &str,
) -> Result<Value, ReplyError> {
    let session = protocol::parse_session_id(raw_id)
        .and_then(|id| state.store.find_by_id(&id))
        .ok_or(ReplyError::Expired)?;
    if !state.store.refresh(&session) {
        return Err(ReplyError::Expired);
    }

    if conn.bind_session(session.id.clone()) {
        debug!(session_id = %session.id, "session resumed on new connection");
    }
    session.set_current_connection(conn.id);

    Ok(json!({
        "expires": session.expires(),
        "success": true,
        "error": Value::Null,
    }))
}

fn session_status(state: &BrokerState, raw_id: &str) -> Result<Value, ReplyError> {
    let session = protocol::parse_session_id(raw_id)
        .and_then(|id| state.store.find_by_id(&id))
        .ok_or(ReplyError::Expired)?;
    if !state.store.refresh(&session) {
        return Err(ReplyError::Expired);
    }

    Ok(json!({
        "last_used": session.last_used(),
        "expires": session.expires(),
        "status": session.state(),
        "settings": session.settings.to_json(),
        "success": true,
        "error": Value::Null,
    }))
}

fn session_destroy(
    state: &BrokerState,
    conn: &ClientConnection,
    raw_id: &str,
) -> Result<Value, ReplyError> {
    let Some(id) = protocol::parse_session_id(raw_id) else {
        return Err(ReplyError::NotFound);
    };
    if !conn.owns(&id) {
        return Err(if state.store.contains(&id) {
            ReplyError::Fraud
        } else {
            ReplyError::NotFound
        });
    }

    let _ = conn.unbind_session(&id);
    if state.store.find_by_id(&id).is_none() {
        return Err(ReplyError::Expired);
    }
    let _ = state.store.destroy(&id);
    Ok(json!({"success": true, "error": Value::Null}))
}

// ── Chat ──

fn chat(
    state: &BrokerState,
    conn: &ClientConnection,
    cid: CorrelationId,
    content: Value,
) -> Result<(), ProtocolError> {
    if !conn.has_sessions() {
        return Err(ProtocolError::ChatWithoutSession);
    }
    let chat: ChatContent = protocol::decode_content(MessageKind::Chat, content)?;

    let reject = |err: ReplyError, sender: &str| {
        debug!(%cid, session_id = %chat.session_id, error = %err, "chat rejected");
        let body = protocol::chat_reply(&chat.session_id, sender, Err(&err));
        let _ = conn.send_envelope(MessageKind::Chat, &cid, &body);
    };

    if chat.kind != "text" {
        reject(ReplyError::NotText, DEFAULT_NAME);
        return Ok(());
    }
    let id = SessionId::from_raw(chat.session_id.clone());
    if !conn.owns(&id) {
        warn!(%cid, session_id = %id, "chat on a session this connection does not own");
        reject(ReplyError::Fraud, DEFAULT_NAME);
        return Ok(());
    }
    if !state.catalog.is_ready() {
        reject(ReplyError::CatalogNotReady, DEFAULT_NAME);
        return Ok(());
    }
    let Some(session) = state.store.find_by_id(&id) else {
        let _ = conn.unbind_session(&id);
        reject(ReplyError::Expired, DEFAULT_NAME);
        return Ok(());
    };

    let input = protocol::decode_b64(&chat.data)?;
    if !state.store.refresh(&session) {
        let _ = conn.unbind_session(&id);
        reject(ReplyError::Expired, DEFAULT_NAME);
        return Ok(());
    }
    session.set_current_connection(conn.id);
    if let Err(err) = state.admission.submit(Arc::clone(&session), cid.clone(), input) {
        reject(err, &session.settings.name);
    }
    Ok(())
}
