//! A session: one engine instance, its settings and its idle clock.
//!
//! State machine (enforced by [`SessionState::can_transition`]):
//!
//! ```text
//! Initializing ──> Idle <──> Processing
//!       │           │            │
//!       └───────────┴────────────┴──> Destroyed (terminal)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use llmbox_core::{ConnectionId, Engine, EngineSettings, SessionId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::errors::ReplyError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initializing,
    Idle,
    Processing,
    Destroyed,
}

impl SessionState {
    /// The transition table. Everything not listed is rejected.
    pub fn can_transition(self, to: Self) -> bool {
        use SessionState::{Destroyed, Idle, Initializing, Processing};
        matches!(
            (self, to),
            (Initializing, Idle)
                | (Idle, Processing)
                | (Processing, Idle)
                | (Initializing | Idle | Processing, Destroyed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Destroyed => "destroyed",
        }
    }
}

struct Inner {
    state: SessionState,
    engine: Option<Arc<dyn Engine>>,
    last_used: Instant,
    /// Connection replies are delivered to.
    current_connection: Option<ConnectionId>,
}

pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub settings: EngineSettings,
    idle: Duration,
    /// Idle-clock reading at `created_at`; wall times are derived from it.
    created: Instant,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(settings: EngineSettings, idle: Duration) -> Self {
        let created = Instant::now();
        Self {
            id: SessionId::new(),
            created_at: Utc::now(),
            settings,
            idle,
            created,
            inner: Mutex::new(Inner {
                state: SessionState::Initializing,
                engine: None,
                last_used: created,
                current_connection: None,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    fn transition(inner: &mut Inner, to: SessionState) -> bool {
        if inner.state.can_transition(to) {
            inner.state = to;
            true
        } else {
            false
        }
    }

    // ── Idle clock ──

    /// Whether the idle window has elapsed. Destroyed sessions are expired.
    pub fn is_expired(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == SessionState::Destroyed || inner.last_used.elapsed() > self.idle
    }

    /// Slide the idle window forward.
    ///
    /// Returns `false`, leaving the clock alone, once the session is
    /// destroyed or its window has already elapsed.
    pub fn touch(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == SessionState::Destroyed || inner.last_used.elapsed() > self.idle {
            return false;
        }
        inner.last_used = Instant::now();
        true
    }

    fn last_used_at(&self) -> DateTime<Utc> {
        let since_created = self.inner.lock().last_used - self.created;
        chrono::Duration::from_std(since_created)
            .map_or(self.created_at, |d| self.created_at + d)
    }

    /// Last access, unix seconds.
    pub fn last_used(&self) -> i64 {
        self.last_used_at().timestamp()
    }

    /// `last_used + idle`, unix seconds, rounded up to the next whole second.
    pub fn expires(&self) -> i64 {
        let deadline = chrono::Duration::from_std(self.idle)
            .ok()
            .and_then(|idle| self.last_used_at().checked_add_signed(idle));
        match deadline {
            Some(at) if at.timestamp_subsec_nanos() > 0 => at.timestamp().saturating_add(1),
            Some(at) => at.timestamp(),
            None => i64::MAX,
        }
    }

    // ── Delivery target ──

    pub fn set_current_connection(&self, id: ConnectionId) {
        self.inner.lock().current_connection = Some(id);
    }

    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.inner.lock().current_connection
    }

    // ── Engine lifecycle ──

    /// Install the loaded engine. Returns `false` (dropping the engine) if
    /// the session was destroyed while loading.
    pub fn engine_ready(&self, engine: Arc<dyn Engine>) -> bool {
        let mut inner = self.inner.lock();
        if Self::transition(&mut inner, SessionState::Idle) {
            inner.engine = Some(engine);
            true
        } else {
            false
        }
    }

    /// Admit one prompt: `Idle -> Processing`, handing out the engine.
    pub fn begin_job(&self) -> Result<Arc<dyn Engine>, ReplyError> {
        let mut inner = self.inner.lock();
        match inner.state {
            SessionState::Initializing => Err(ReplyError::Initializing),
            SessionState::Processing => Err(ReplyError::Busy),
            SessionState::Destroyed => Err(ReplyError::Expired),
            SessionState::Idle => {
                let engine = inner.engine.clone().ok_or(ReplyError::Initializing)?;
                let _ = Self::transition(&mut inner, SessionState::Processing);
                Ok(engine)
            }
        }
    }

    /// `Processing -> Idle`. A no-op once destroyed.
    pub fn finish_job(&self) {
        let mut inner = self.inner.lock();
        let _ = Self::transition(&mut inner, SessionState::Idle);
    }

    /// Enter the terminal state and release the engine.
    ///
    /// Returns `true` only for the call that actually destroyed it.
    pub fn destroy(&self) -> bool {
        let mut inner = self.inner.lock();
        if Self::transition(&mut inner, SessionState::Destroyed) {
            inner.engine = None;
            inner.current_connection = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use llmbox_core::mock::MockEngine;

    use super::*;
    use SessionState::{Destroyed, Idle, Initializing, Processing};

    fn engine() -> Arc<dyn Engine> {
        Arc::new(MockEngine::new(vec![]))
    }

    fn session(idle: Duration) -> Session {
        Session::new(EngineSettings::default(), idle)
    }

    #[test]
    fn transition_table() {
        let allowed = [
            (Initializing, Idle),
            (Idle, Processing),
            (Processing, Idle),
            (Initializing, Destroyed),
            (Idle, Destroyed),
            (Processing, Destroyed),
        ];
        for from in [Initializing, Idle, Processing, Destroyed] {
            for to in [Initializing, Idle, Processing, Destroyed] {
                assert_eq!(
                    from.can_transition(to),
                    allowed.contains(&(from, to)),
                    "{from:?} -> {to:?}"
                );
            }
        }
    }

    #[test]
    fn job_admission_follows_state() {
        let s = session(Duration::from_secs(60));
        assert_eq!(s.begin_job().err(), Some(ReplyError::Initializing));

        assert!(s.engine_ready(engine()));
        assert_eq!(s.state(), Idle);
        assert!(s.begin_job().is_ok());
        assert_eq!(s.state(), Processing);
        assert_eq!(s.begin_job().err(), Some(ReplyError::Busy));

        s.finish_job();
        assert_eq!(s.state(), Idle);
        assert!(s.begin_job().is_ok());
    }

    #[test]
    fn destroy_is_terminal_and_once() {
        let s = session(Duration::from_secs(60));
        assert!(s.engine_ready(engine()));
        let _ = s.begin_job().unwrap();
        assert!(s.destroy());
        assert!(!s.destroy());
        s.finish_job();
        assert_eq!(s.state(), Destroyed);
        assert_eq!(s.begin_job().err(), Some(ReplyError::Expired));
        assert!(s.is_expired());
    }

    #[test]
    fn engine_ready_after_destroy_is_dropped() {
        let s = session(Duration::from_secs(60));
        assert!(s.destroy());
        assert!(!s.engine_ready(engine()));
        assert_eq!(s.state(), Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_window_slides() {
        let s = session(Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!s.is_expired());
        assert!(s.touch());
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(!s.is_expired());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(s.is_expired());
        assert!(!s.touch());
    }

    #[test]
    fn touch_after_destroy_is_refused() {
        let s = session(Duration::from_secs(60));
        assert!(s.destroy());
        assert!(!s.touch());
    }

    #[test]
    fn expires_is_last_used_plus_idle() {
        let s = session(Duration::from_secs(1800));
        let created = s.created_at.timestamp();
        let rounding = i64::from(s.created_at.timestamp_subsec_nanos() > 0);
        assert_eq!(s.last_used(), created);
        assert_eq!(s.expires(), created + 1800 + rounding);
    }

    #[test]
    fn sub_second_idle_still_expires_after_last_use() {
        let s = session(Duration::from_millis(200));
        assert!(s.expires() > s.last_used());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_follows_the_idle_clock() {
        let s = session(Duration::from_secs(60));
        let before = s.expires();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(s.touch());
        assert_eq!(s.expires(), before + 30);
        assert_eq!(s.last_used(), s.created_at.timestamp() + 30);
    }

    #[test]
    fn current_connection_cleared_on_destroy() {
        let s = session(Duration::from_secs(60));
        let id = ConnectionId::next();
        s.set_current_connection(id);
        assert_eq!(s.current_connection(), Some(id));
        let _ = s.destroy();
        assert_eq!(s.current_connection(), None);
    }
}
