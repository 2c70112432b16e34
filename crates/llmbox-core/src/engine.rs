//! Seam to the external inference capability.
//!
//! The broker never looks inside an engine. It loads one per session through an
//! [`EngineLoader`] and calls [`Engine::prompt`] at most once at a time; the
//! session state machine, not the engine, owns the status.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::prompt::PromptTemplate;
use crate::settings::EngineSettings;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("model file not found: {}", .0.display())]
    ModelMissing(PathBuf),

    #[error("failed to start engine: {0}")]
    Spawn(String),

    #[error("engine exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("engine produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("{0}")]
    Internal(String),
}

/// Everything needed to bring up one engine instance.
#[derive(Clone, Debug)]
pub struct EngineSpec {
    pub model_path: PathBuf,
    pub threads: usize,
    pub settings: EngineSettings,
    pub template: PromptTemplate,
}

/// A loaded, ready-to-prompt engine instance.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn prompt(&self, input: &str) -> Result<String, EngineError>;
}

/// Produces engine instances. Loading may be slow (model weights).
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn load(&self, spec: EngineSpec) -> Result<Arc<dyn Engine>, EngineError>;
}
