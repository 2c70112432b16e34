//! Settings type definitions.
//!
//! Every section implements [`Default`] with production values and is marked
//! `#[serde(default)]`, so a settings file only needs the keys it changes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings type for the broker.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    pub server: ServerSettings,
    pub sessions: SessionSettings,
    pub engine: EngineCommandSettings,
    pub catalog: CatalogSettings,
}

/// Listener and per-connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Address to bind.
    pub host: String,
    pub port: u16,
    /// PEM private key. TLS is enabled only with both key and certificate.
    pub tls_key: Option<PathBuf>,
    /// PEM certificate chain.
    pub tls_cert: Option<PathBuf>,
    /// Pipe-delimited notices sent to every new connection.
    pub motd: Option<String>,
    /// Outbound messages buffered per connection before replies are dropped.
    pub max_send_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8184,
            tls_key: None,
            tls_cert: None,
            motd: None,
            max_send_queue: 256,
        }
    }
}

impl ServerSettings {
    /// Key and certificate paths, if TLS is fully configured.
    pub fn tls_paths(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.tls_key, &self.tls_cert) {
            (Some(key), Some(cert)) => Some((key.clone(), cert.clone())),
            _ => None,
        }
    }

    /// Non-empty motd segments, in order.
    pub fn motd_lines(&self) -> Vec<String> {
        self.motd
            .as_deref()
            .map(|m| {
                m.split('|')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Session lifecycle and inference concurrency.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Reaper sweep interval.
    pub heartbeat_interval_ms: u64,
    /// Sliding idle window after which a session expires.
    pub max_idle_session_ms: u64,
    /// Threads handed to each engine instance.
    pub model_threads: usize,
    /// Inference calls running at once across all sessions.
    pub max_concurrent_jobs: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            max_idle_session_ms: 30 * 60 * 1_000,
            model_threads: 4,
            max_concurrent_jobs: 4,
        }
    }
}

impl SessionSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn max_idle_session(&self) -> Duration {
        Duration::from_millis(self.max_idle_session_ms)
    }
}

/// External engine executable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineCommandSettings {
    pub command: String,
}

impl Default for EngineCommandSettings {
    fn default() -> Self {
        Self {
            command: "llmbox-engine".into(),
        }
    }
}

/// Model catalog source, storage and verification.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogSettings {
    /// Remote descriptor feed, fetched when no local list exists.
    pub source_url: String,
    /// Directory holding model files and the persisted descriptor list.
    pub storage_path: PathBuf,
    /// `false` treats presence of a model file as sufficient.
    pub verify_hashes: bool,
    pub download_attempts: u32,
    pub parallel_downloads: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            source_url: "https://gpt4all.io/models/models3.json".into(),
            storage_path: home_dir().join(".llmbox").join("models"),
            verify_hashes: true,
            download_attempts: 3,
            parallel_downloads: 2,
        }
    }
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = BrokerSettings::default();
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 8184);
        assert_eq!(s.sessions.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(s.sessions.max_idle_session(), Duration::from_secs(1800));
        assert_eq!(s.sessions.model_threads, 4);
        assert!(s.catalog.verify_hashes);
        assert_eq!(s.catalog.download_attempts, 3);
        assert!(s.catalog.storage_path.ends_with(".llmbox/models"));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"server": {"port": 9000}, "catalog": {"verifyHashes": false}}"#;
        let s: BrokerSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "0.0.0.0");
        assert!(!s.catalog.verify_hashes);
        assert_eq!(s.sessions.max_concurrent_jobs, 4);
    }

    #[test]
    fn tls_requires_both_paths() {
        let mut s = ServerSettings {
            tls_key: Some("key.pem".into()),
            ..ServerSettings::default()
        };
        assert!(s.tls_paths().is_none());
        s.tls_cert = Some("cert.pem".into());
        assert_eq!(
            s.tls_paths(),
            Some((PathBuf::from("key.pem"), PathBuf::from("cert.pem")))
        );
    }

    #[test]
    fn motd_splits_on_pipe() {
        let s = ServerSettings {
            motd: Some("Welcome!| be nice ||".into()),
            ..ServerSettings::default()
        };
        assert_eq!(s.motd_lines(), vec!["Welcome!", "be nice"]);
    }

    #[test]
    fn motd_absent() {
        assert!(ServerSettings::default().motd_lines().is_empty());
    }
}
