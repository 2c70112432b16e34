//! Registry of live client connections.

use std::sync::Arc;

use dashmap::DashMap;
use llmbox_catalog::ModelDescriptor;
use llmbox_core::ConnectionId;
use serde_json::Value;
use tracing::debug;

use crate::connection::ClientConnection;
use crate::protocol;

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id, connection);
    }

    /// Remove a connection and release its session bindings.
    ///
    /// Sessions are left in the store so another connection can resume them.
    pub fn unregister(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        let (_, connection) = self.connections.remove(&id)?;
        let released = connection.release_sessions();
        debug!(connection_id = %id, released, "connection unregistered");
        Some(connection)
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(&id).map(|c| Arc::clone(c.value()))
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn all(&self) -> Vec<Arc<ClientConnection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Send an administrative `system` envelope to every connection.
    pub fn broadcast_system(&self, content: &Value) -> usize {
        self.all()
            .into_iter()
            .filter(|c| c.send_system(content))
            .count()
    }

    /// Push the catalog to every connection that has not received it yet.
    pub fn push_catalog(&self, models: &[ModelDescriptor]) -> usize {
        let content = protocol::models_push(models);
        self.all()
            .into_iter()
            .filter(|c| c.claim_catalog_delivery())
            .filter(|c| c.send_system(&content))
            .count()
    }

    /// Ask every connection's writer to close with `code`.
    pub fn close_all(&self, code: u16, reason: &str) -> usize {
        self.all()
            .into_iter()
            .filter(|c| c.close(code, reason))
            .count()
    }
}
