//! # llmbox-core
//!
//! Types shared by every llmbox crate:
//!
//! - wire identifiers ([`SessionId`], [`CorrelationId`], [`ConnectionId`])
//! - the typed engine settings schema with its coercion rules
//! - the [`Engine`] / [`EngineLoader`] seam to the external inference capability
//! - prompt template rendering and the command-backed engine adapter

#![deny(unsafe_code)]

pub mod command;
pub mod engine;
pub mod ids;
pub mod mock;
pub mod prompt;
pub mod settings;

pub use engine::{Engine, EngineError, EngineLoader, EngineSpec};
pub use ids::{ConnectionId, CorrelationId, SessionId};
pub use prompt::PromptTemplate;
pub use settings::{EngineSettings, SettingKind, SettingsCoercionError};
