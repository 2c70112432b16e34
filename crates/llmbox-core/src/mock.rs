use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::engine::{Engine, EngineError, EngineLoader, EngineSpec};

/// Pre-programmed engine behaviour for deterministic tests.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return the input unchanged.
    Echo,
    /// Return fixed text.
    Text(String),
    /// Fail the prompt.
    Error(String),
    /// Wait, then behave like the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Engine that answers from a script, falling back to [`MockReply::Echo`].
pub struct MockEngine {
    replies: Vec<MockReply>,
    call_count: AtomicUsize,
}

impl MockEngine {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn prompt(&self, input: &str) -> Result<String, EngineError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        let mut reply = self.replies.get(idx).cloned().unwrap_or(MockReply::Echo);
        loop {
            match reply {
                MockReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
                MockReply::Echo => return Ok(input.to_owned()),
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(msg) => return Err(EngineError::Internal(msg)),
            }
        }
    }
}

/// Loader handing out a fresh [`MockEngine`] per session.
#[derive(Default)]
pub struct MockEngineLoader {
    replies: Vec<MockReply>,
    load_delay: Option<Duration>,
    fail_load: bool,
    loaded: Mutex<Vec<EngineSpec>>,
}

impl MockEngineLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script every engine produced by this loader.
    #[must_use]
    pub fn with_replies(mut self, replies: Vec<MockReply>) -> Self {
        self.replies = replies;
        self
    }

    /// Keep sessions in `Initializing` for `delay`.
    #[must_use]
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Specs of every engine loaded so far.
    pub fn loaded(&self) -> Vec<EngineSpec> {
        self.loaded.lock().clone()
    }
}

#[async_trait]
impl EngineLoader for MockEngineLoader {
    async fn load(&self, spec: EngineSpec) -> Result<Arc<dyn Engine>, EngineError> {
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_load {
            return Err(EngineError::ModelMissing(spec.model_path));
        }
        self.loaded.lock().push(spec);
        Ok(Arc::new(MockEngine::new(self.replies.clone())))
    }
}
