//! The authoritative session registry.
//!
//! Expiry is checked lazily on every lookup and periodically by the reaper.
//! Both paths go through [`SessionStore::evict_if_expired`], so each expired
//! session is destroyed exactly once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use llmbox_core::{EngineLoader, EngineSettings, EngineSpec, PromptTemplate, SessionId};
use tracing::{debug, info, warn};

use crate::session::Session;

pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<Session>>,
    loader: Arc<dyn EngineLoader>,
}

impl SessionStore {
    pub fn new(loader: Arc<dyn EngineLoader>) -> Self {
        Self {
            sessions: DashMap::new(),
            loader,
        }
    }

    /// Register a new session and start loading its engine in the background.
    ///
    /// The session is `Initializing` until the load finishes. A failed load
    /// destroys it.
    pub fn create(
        self: &Arc<Self>,
        idle: Duration,
        model_path: PathBuf,
        threads: usize,
        settings: EngineSettings,
        template: PromptTemplate,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(settings.clone(), idle));
        let _ = self.sessions.insert(session.id.clone(), Arc::clone(&session));
        info!(session_id = %session.id, model = %model_path.display(), "session created");

        let spec = EngineSpec {
            model_path,
            threads,
            settings,
            template,
        };
        let store = Arc::clone(self);
        let loading = Arc::clone(&session);
        drop(tokio::spawn(async move {
            match store.loader.load(spec).await {
                Ok(engine) => {
                    if loading.engine_ready(engine) {
                        debug!(session_id = %loading.id, "engine ready");
                    }
                }
                Err(e) => {
                    warn!(session_id = %loading.id, error = %e, "engine failed to load");
                    let _ = store.destroy(&loading.id);
                }
            }
        }));

        session
    }

    /// Live session by id; expired entries are evicted and reported absent.
    pub fn find_by_id(&self, id: &SessionId) -> Option<Arc<Session>> {
        let session = self.sessions.get(id).map(|s| Arc::clone(s.value()))?;
        if self.evict_if_expired(id) {
            return None;
        }
        Some(session)
    }

    /// Whether an entry exists, without refreshing or evicting it.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Slide the idle window of a live session.
    ///
    /// Returns `false` if the session lapsed or was destroyed since it was
    /// looked up; a lapsed entry is evicted here.
    pub fn refresh(&self, session: &Session) -> bool {
        if session.touch() {
            return true;
        }
        let _ = self.destroy(&session.id);
        false
    }

    /// Remove and destroy. Absent or already-destroyed ids are a no-op.
    pub fn destroy(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                let destroyed = session.destroy();
                if destroyed {
                    info!(session_id = %id, "session destroyed");
                }
                destroyed
            }
            None => false,
        }
    }

    /// Remove `id` if it is expired at the time of removal.
    fn evict_if_expired(&self, id: &SessionId) -> bool {
        match self.sessions.remove_if(id, |_, s| s.is_expired()) {
            Some((_, session)) => {
                if session.destroy() {
                    info!(session_id = %id, "session expired");
                }
                true
            }
            None => false,
        }
    }

    /// Evict every expired session. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let candidates: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect();
        candidates
            .iter()
            .filter(|id| self.evict_if_expired(id))
            .count()
    }

    /// Destroy every session (process shutdown).
    pub fn destroy_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.iter().filter(|id| self.destroy(id)).count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
