//! # llmbox-settings
//!
//! Process configuration for the broker, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BrokerSettings::default()`]
//! 2. **Settings file**: optional JSON file (deep-merged over defaults)
//! 3. **Environment variables**: `LLMBOX_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_with, deep_merge, load_settings_from_path,
};
pub use types::*;
