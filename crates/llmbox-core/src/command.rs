//! Engine adapter that runs an external executable once per prompt.
//!
//! The executable receives the rendered prompt on stdin and must write the
//! completion to stdout. Model path, thread count and the JSON-encoded
//! settings are passed as `LLMBOX_MODEL_PATH`, `LLMBOX_THREADS` and
//! `LLMBOX_SETTINGS`.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::engine::{Engine, EngineError, EngineLoader, EngineSpec};

pub struct CommandEngineLoader {
    program: String,
}

impl CommandEngineLoader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl EngineLoader for CommandEngineLoader {
    async fn load(&self, spec: EngineSpec) -> Result<Arc<dyn Engine>, EngineError> {
        if !tokio::fs::try_exists(&spec.model_path).await.unwrap_or(false) {
            return Err(EngineError::ModelMissing(spec.model_path));
        }
        debug!(program = %self.program, model = %spec.model_path.display(), "engine ready");
        Ok(Arc::new(CommandEngine {
            program: self.program.clone(),
            spec,
        }))
    }
}

pub struct CommandEngine {
    program: String,
    spec: EngineSpec,
}

#[async_trait]
impl Engine for CommandEngine {
    async fn prompt(&self, input: &str) -> Result<String, EngineError> {
        let prompt = self
            .spec
            .template
            .render(&self.spec.settings.name, input, Utc::now());
        let settings = serde_json::to_string(&self.spec.settings)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        let mut child = tokio::process::Command::new(&self.program)
            .env("LLMBOX_MODEL_PATH", &self.spec.model_path)
            .env("LLMBOX_THREADS", self.spec.threads.to_string())
            .env("LLMBOX_SETTINGS", settings)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {e}", self.program)))?;

        // Stdin is fed while stdout drains so neither pipe can fill and stall.
        let stdin = child.stdin.take();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The exit status is the authoritative failure signal.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(error = %e, "engine closed stdin early");
                }
            }
        };
        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| EngineError::Internal(format!("wait for engine: {e}")))?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        String::from_utf8(output.stdout)
            .map(|s| s.trim().to_owned())
            .map_err(|e| EngineError::InvalidOutput(e.to_string()))
    }
}
