//! Job admission: at most one in-flight prompt per session, bounded overall.
//!
//! The per-session rule lives in [`Session::begin_job`]; this module adds the
//! global concurrency limit and delivers the single reply for each admitted
//! job to whichever connection is current for the session when it finishes.

use std::sync::Arc;

use llmbox_core::{CorrelationId, EngineError};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::errors::ReplyError;
use crate::protocol::{self, MessageKind};
use crate::registry::ConnectionRegistry;
use crate::session::Session;

pub struct JobAdmission {
    permits: Arc<Semaphore>,
    registry: Arc<ConnectionRegistry>,
}

impl JobAdmission {
    pub fn new(max_concurrent_jobs: usize, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            registry,
        }
    }

    /// Admit a prompt or reject it immediately.
    ///
    /// On admission the session moves to `Processing` and inference runs on
    /// its own task; the result is delivered asynchronously.
    pub fn submit(
        &self,
        session: Arc<Session>,
        cid: CorrelationId,
        input: String,
    ) -> Result<(), ReplyError> {
        let engine = session.begin_job()?;
        let permits = Arc::clone(&self.permits);
        let registry = Arc::clone(&self.registry);

        drop(tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                Ok(_permit) => engine.prompt(&input).await,
                Err(_) => Err(EngineError::Internal("job queue closed".into())),
            };
            session.finish_job();
            deliver(&registry, &session, &cid, outcome);
        }));
        Ok(())
    }
}

fn deliver(
    registry: &ConnectionRegistry,
    session: &Session,
    cid: &CorrelationId,
    outcome: Result<String, EngineError>,
) {
    let content = match outcome {
        Ok(text) => protocol::chat_reply(session.id.as_str(), &session.settings.name, Ok(&text)),
        Err(e) => {
            warn!(session_id = %session.id, %cid, error = %e, "prompt failed");
            let err = ReplyError::Engine(e.to_string());
            protocol::chat_reply(session.id.as_str(), &session.settings.name, Err(&err))
        }
    };

    let target = session
        .current_connection()
        .and_then(|id| registry.lookup(id))
        .filter(|conn| conn.owns(&session.id));
    match target {
        Some(conn) => {
            if !conn.send_envelope(MessageKind::Chat, cid, &content) {
                debug!(connection_id = %conn.id, %cid, "reply dropped, send queue full");
            }
        }
        None => debug!(session_id = %session.id, %cid, "no connection for reply, dropping"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use llmbox_core::mock::{MockEngine, MockReply};
    use llmbox_core::{ConnectionId, EngineSettings};
    use serde_json::Value;
    use tokio::sync::mpsc;

    use super::*;
    use crate::connection::{ClientConnection, Outbound};
    use crate::session::SessionState;

    struct Fixture {
        admission: JobAdmission,
        registry: Arc<ConnectionRegistry>,
    }

    fn fixture(max_jobs: usize) -> Fixture {
        let registry = Arc::new(ConnectionRegistry::new());
        Fixture {
            admission: JobAdmission::new(max_jobs, Arc::clone(&registry)),
            registry,
        }
    }

    fn ready_session(replies: Vec<MockReply>) -> Arc<Session> {
        let s = Arc::new(Session::new(EngineSettings::default(), Duration::from_secs(600)));
        assert!(s.engine_ready(Arc::new(MockEngine::new(replies))));
        s
    }

    fn attach(
        registry: &ConnectionRegistry,
        session: &Session,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(ClientConnection::new(
            ConnectionId::next(),
            "127.0.0.1:9".parse().unwrap(),
            tx,
        ));
        let _ = conn.bind_session(session.id.clone());
        session.set_current_connection(conn.id);
        registry.register(Arc::clone(&conn));
        (conn, rx)
    }

    async fn recv_json(rx: &mut mpsc::Receiver<Outbound>) -> Value {
        match rx.recv().await.unwrap() {
            Outbound::Text(t) => serde_json::from_str(&t).unwrap(),
            other @ Outbound::Close { .. } => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn reply_carries_cid_and_text() {
        let f = fixture(2);
        let s = ready_session(vec![MockReply::Text("pong".into())]);
        let (_conn, mut rx) = attach(&f.registry, &s);
        let cid = CorrelationId::new();

        f.admission.submit(Arc::clone(&s), cid.clone(), "ping".into()).unwrap();
        let v = recv_json(&mut rx).await;
        assert_eq!(v["msg"], "chat");
        assert_eq!(v["cid"], cid.as_str());
        assert_eq!(v["content"]["success"], true);
        assert_eq!(v["content"]["data"], protocol::encode_b64("pong"));
        assert_eq!(v["content"]["sender"], "Alice");
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn second_prompt_rejected_while_processing() {
        let f = fixture(2);
        let s = ready_session(vec![MockReply::delayed(
            Duration::from_secs(5),
            MockReply::Echo,
        )]);
        let (_conn, mut rx) = attach(&f.registry, &s);

        f.admission.submit(Arc::clone(&s), CorrelationId::new(), "one".into()).unwrap();
        let second = f.admission.submit(Arc::clone(&s), CorrelationId::new(), "two".into());
        assert_eq!(second, Err(ReplyError::Busy));

        let v = recv_json(&mut rx).await;
        assert_eq!(v["content"]["data"], protocol::encode_b64("one"));
        assert!(f.admission.submit(s, CorrelationId::new(), "three".into()).is_ok());
    }

    #[tokio::test]
    async fn initializing_session_rejected() {
        let f = fixture(1);
        let s = Arc::new(Session::new(EngineSettings::default(), Duration::from_secs(60)));
        let err = f.admission.submit(s, CorrelationId::new(), "x".into()).unwrap_err();
        assert_eq!(err, ReplyError::Initializing);
    }

    #[tokio::test]
    async fn engine_failure_still_replies() {
        let f = fixture(1);
        let s = ready_session(vec![MockReply::Error("out of memory".into())]);
        let (_conn, mut rx) = attach(&f.registry, &s);
        f.admission.submit(Arc::clone(&s), CorrelationId::new(), "x".into()).unwrap();

        let v = recv_json(&mut rx).await;
        assert_eq!(v["content"]["success"], false);
        assert_eq!(v["content"]["error"], "engine failure: out of memory");
        assert!(v["content"]["data"].is_null());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reply_goes_to_current_connection() {
        let f = fixture(1);
        let s = ready_session(vec![MockReply::delayed(
            Duration::from_secs(1),
            MockReply::Echo,
        )]);
        let (first, mut rx_first) = attach(&f.registry, &s);
        f.admission.submit(Arc::clone(&s), CorrelationId::new(), "hi".into()).unwrap();

        // Another connection resumes the session mid-flight.
        let (_second, mut rx_second) = attach(&f.registry, &s);
        let _ = f.registry.unregister(first.id);

        let v = recv_json(&mut rx_second).await;
        assert_eq!(v["content"]["data"], protocol::encode_b64("hi"));
        assert!(rx_first.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_dropped_when_connection_gone() {
        let f = fixture(1);
        let s = ready_session(vec![MockReply::delayed(
            Duration::from_secs(1),
            MockReply::Echo,
        )]);
        let (conn, mut rx) = attach(&f.registry, &s);
        f.admission.submit(Arc::clone(&s), CorrelationId::new(), "hi".into()).unwrap();
        let _ = f.registry.unregister(conn.id);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_mid_flight_stays_destroyed() {
        let f = fixture(1);
        let s = ready_session(vec![MockReply::delayed(
            Duration::from_secs(1),
            MockReply::Echo,
        )]);
        let (_conn, mut rx) = attach(&f.registry, &s);
        f.admission.submit(Arc::clone(&s), CorrelationId::new(), "hi".into()).unwrap();
        assert!(s.destroy());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(s.state(), SessionState::Destroyed);
        assert!(rx.try_recv().is_err());
    }
}
