//! # llmbox-telemetry
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] built from the
//! configured level plus per-module overrides (`RUST_LOG` wins when set),
//! feeding either a JSON or a human-readable stdout layer.

#![deny(unsafe_code)]

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"llmbox_catalog" => DEBUG`).
    pub module_levels: Vec<(String, Level)>,
    /// Emit one JSON object per event instead of the pretty formatter.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: vec![
                ("hyper".into(), Level::WARN),
                ("reqwest".into(), Level::WARN),
            ],
            json: false,
        }
    }
}

/// Errors from subscriber installation.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the filter directive string, e.g. `info,hyper=warn`.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter = level_name(config.log_level).to_owned();
    for (module, level) in &config.module_levels {
        filter.push(',');
        filter.push_str(module);
        filter.push('=');
        filter.push_str(level_name(*level));
    }
    filter
}

/// Parse a level name as accepted on the command line.
pub fn parse_level(name: &str) -> Option<Level> {
    name.parse().ok()
}

/// Initialize the telemetry subsystem. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init()?;
    Ok(())
}

fn level_name(level: Level) -> &'static str {
    match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives() {
        let cfg = TelemetryConfig::default();
        assert_eq!(filter_directives(&cfg), "info,hyper=warn,reqwest=warn");
    }

    #[test]
    fn module_overrides_appended() {
        let cfg = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![("llmbox_server".into(), Level::TRACE)],
            json: true,
        };
        assert_eq!(filter_directives(&cfg), "warn,llmbox_server=trace");
    }

    #[test]
    fn directives_parse_as_env_filter() {
        let cfg = TelemetryConfig::default();
        assert!(EnvFilter::try_new(filter_directives(&cfg)).is_ok());
    }

    #[test]
    fn parse_level_names() {
        assert_eq!(parse_level("debug"), Some(Level::DEBUG));
        assert_eq!(parse_level("WARN"), Some(Level::WARN));
        assert_eq!(parse_level("loud"), None);
    }

    #[test]
    fn second_init_fails() {
        let cfg = TelemetryConfig::default();
        let _ = init_telemetry(&cfg);
        assert!(init_telemetry(&cfg).is_err());
    }
}
