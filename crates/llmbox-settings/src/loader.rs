//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`BrokerSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `LLMBOX_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::BrokerSettings;

/// Load settings from an optional JSON file with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or out-of-range values are errors.
pub fn load_settings_from_path(path: Option<&Path>) -> Result<BrokerSettings> {
    let defaults = serde_json::to_value(BrokerSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    let mut settings: BrokerSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `LLMBOX_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut BrokerSettings) {
    apply_env_overrides_with(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`.
///
/// Integers must be valid and within range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides_with<F>(settings: &mut BrokerSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("LLMBOX_ADDRESS") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("LLMBOX_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("LLMBOX_SSL_KEY") {
        settings.server.tls_key = Some(PathBuf::from(v));
    }
    if let Some(v) = env.string("LLMBOX_SSL_CERT") {
        settings.server.tls_cert = Some(PathBuf::from(v));
    }
    if let Some(v) = env.string("LLMBOX_SYSTEM_MESSAGE") {
        settings.server.motd = Some(v);
    }
    if let Some(v) = env.usize("LLMBOX_MAX_SEND_QUEUE", 1, 65_536) {
        settings.server.max_send_queue = v;
    }

    // ── Sessions ────────────────────────────────────────────────────
    if let Some(v) = env.u64("LLMBOX_HEARTBEAT_INTERVAL", 100, 600_000) {
        settings.sessions.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("LLMBOX_MAX_IDLE_SESSION_DURATION", 1_000, 86_400_000) {
        settings.sessions.max_idle_session_ms = v;
    }
    if let Some(v) = env.usize("LLMBOX_MODEL_THREADS", 1, 256) {
        settings.sessions.model_threads = v;
    }
    if let Some(v) = env.usize("LLMBOX_MAX_CONCURRENT_JOBS", 1, 1_024) {
        settings.sessions.max_concurrent_jobs = v;
    }

    // ── Engine ──────────────────────────────────────────────────────
    if let Some(v) = env.string("LLMBOX_ENGINE_COMMAND") {
        settings.engine.command = v;
    }

    // ── Catalog ─────────────────────────────────────────────────────
    if let Some(v) = env.string("LLMBOX_MODELS_URL") {
        settings.catalog.source_url = v;
    }
    if let Some(v) = env.string("LLMBOX_MODELS_PATH") {
        settings.catalog.storage_path = PathBuf::from(v);
    }
    if let Some(v) = env.bool("LLMBOX_VERIFY_MODELS") {
        settings.catalog.verify_hashes = v;
    }
    if let Some(v) = env.u64("LLMBOX_DOWNLOAD_ATTEMPTS", 1, 100) {
        settings.catalog.download_attempts = u32::try_from(v).unwrap_or(u32::MAX);
    }
    if let Some(v) = env.usize("LLMBOX_PARALLEL_DOWNLOADS", 1, 64) {
        settings.catalog.parallel_downloads = v;
    }
}

/// Reject values that would leave the broker unable to serve.
fn validate(settings: &BrokerSettings) -> Result<()> {
    if settings.server.max_send_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "server.maxSendQueue must be at least 1".into(),
        ));
    }
    if settings.sessions.max_concurrent_jobs == 0 {
        return Err(SettingsError::InvalidValue(
            "sessions.maxConcurrentJobs must be at least 1".into(),
        ));
    }
    if settings.sessions.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "sessions.heartbeatIntervalMs must be positive".into(),
        ));
    }
    if settings.catalog.download_attempts == 0 || settings.catalog.parallel_downloads == 0 {
        return Err(SettingsError::InvalidValue(
            "catalog download attempts and parallelism must be at least 1".into(),
        ));
    }
    let server = &settings.server;
    if server.tls_key.is_some() != server.tls_cert.is_some() {
        warn!("only one of TLS key/certificate configured, serving plain WebSocket");
    }
    Ok(())
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn string(&self, name: &str) -> Option<String> {
        self.raw(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = self.raw(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.raw(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.raw(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = self.raw(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use serde_json::json;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──

    #[test]
    fn merge_nested_objects() {
        let target = json!({"server": {"port": 8184, "host": "0.0.0.0"}});
        let source = json!({"server": {"port": 9000}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9000);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_skips_null() {
        let target = json!({"server": {"motd": "hi"}});
        let source = json!({"server": {"motd": null}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["motd"], "hi");
    }

    #[test]
    fn merge_replaces_arrays_and_primitives() {
        let merged = deep_merge(json!({"a": [1, 2], "b": 1}), json!({"a": [3], "b": "x"}));
        assert_eq!(merged["a"], json!([3]));
        assert_eq!(merged["b"], "x");
    }

    #[test]
    fn merge_adds_new_keys() {
        let merged = deep_merge(json!({"a": 1}), json!({"b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    // ── parsing ──

    #[test]
    fn parse_bool_values() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8184", 1, 65535), Some(8184));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u16_range("70000", 1, 65535), None);
        assert_eq!(parse_u64_range("5000", 100, 600_000), Some(5000));
        assert_eq!(parse_u64_range("-1", 0, 10), None);
        assert_eq!(parse_usize_range("4", 1, 256), Some(4));
        assert_eq!(parse_usize_range("abc", 1, 256), None);
    }

    // ── env overrides ──

    #[test]
    fn env_overrides_apply() {
        let mut s = BrokerSettings::default();
        apply_env_overrides_with(
            &mut s,
            env_of(&[
                ("LLMBOX_ADDRESS", "127.0.0.1"),
                ("LLMBOX_PORT", "9100"),
                ("LLMBOX_SSL_KEY", "/etc/key.pem"),
                ("LLMBOX_SSL_CERT", "/etc/cert.pem"),
                ("LLMBOX_SYSTEM_MESSAGE", "hello|world"),
                ("LLMBOX_HEARTBEAT_INTERVAL", "250"),
                ("LLMBOX_MAX_IDLE_SESSION_DURATION", "60000"),
                ("LLMBOX_MODEL_THREADS", "8"),
                ("LLMBOX_ENGINE_COMMAND", "/usr/bin/engine"),
                ("LLMBOX_MODELS_PATH", "/srv/models"),
                ("LLMBOX_VERIFY_MODELS", "false"),
                ("LLMBOX_DOWNLOAD_ATTEMPTS", "5"),
            ]),
        );
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.port, 9100);
        assert!(s.server.tls_paths().is_some());
        assert_eq!(s.server.motd_lines(), vec!["hello", "world"]);
        assert_eq!(s.sessions.heartbeat_interval_ms, 250);
        assert_eq!(s.sessions.max_idle_session_ms, 60_000);
        assert_eq!(s.sessions.model_threads, 8);
        assert_eq!(s.engine.command, "/usr/bin/engine");
        assert_eq!(s.catalog.storage_path, PathBuf::from("/srv/models"));
        assert!(!s.catalog.verify_hashes);
        assert_eq!(s.catalog.download_attempts, 5);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = BrokerSettings::default();
        apply_env_overrides_with(
            &mut s,
            env_of(&[
                ("LLMBOX_PORT", "not-a-port"),
                ("LLMBOX_VERIFY_MODELS", "sometimes"),
                ("LLMBOX_MAX_CONCURRENT_JOBS", "0"),
                ("LLMBOX_ADDRESS", ""),
            ]),
        );
        assert_eq!(s.server.port, 8184);
        assert!(s.catalog.verify_hashes);
        assert_eq!(s.sessions.max_concurrent_jobs, 4);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    // ── file loading ──

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = load_settings_from_path(Some(&dir.path().join("absent.json"))).unwrap();
        assert_eq!(s.server.port, BrokerSettings::default().server.port);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sessions": {{"maxConcurrentJobs": 2}}, "engine": {{"command": "my-engine"}}}}"#
        )
        .unwrap();
        let s = load_settings_from_path(Some(file.path())).unwrap();
        assert_eq!(s.sessions.max_concurrent_jobs, 2);
        assert_eq!(s.sessions.model_threads, 4);
        assert_eq!(s.engine.command, "my-engine");
    }

    #[test]
    fn invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_settings_from_path(Some(file.path())).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sessions": {{"maxConcurrentJobs": 0}}}}"#).unwrap();
        let err = load_settings_from_path(Some(file.path())).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }
}
