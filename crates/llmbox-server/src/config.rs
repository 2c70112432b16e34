//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use llmbox_settings::BrokerSettings;

/// Runtime configuration of the broker server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// `(key, cert)` PEM paths. TLS is on when set.
    pub tls: Option<(PathBuf, PathBuf)>,
    /// Notices sent to every new connection, one envelope each.
    pub motd: Vec<String>,
    /// Per-connection outbound queue depth.
    pub max_send_queue: usize,
    pub reaper_interval_ms: u64,
    pub max_idle_session_ms: u64,
    /// Inference threads handed to each engine.
    pub model_threads: usize,
    /// Global bound on concurrently running prompts.
    pub max_concurrent_jobs: usize,
    /// Directory model files are resolved against.
    pub models_path: PathBuf,
    /// WebSocket ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Drop a peer that has been silent this long.
    pub client_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            tls: None,
            motd: Vec::new(),
            max_send_queue: 256,
            reaper_interval_ms: 5_000,
            max_idle_session_ms: 1_800_000,
            model_threads: 4,
            max_concurrent_jobs: 4,
            models_path: PathBuf::from("models"),
            ping_interval_secs: 30,
            client_timeout_secs: 90,
        }
    }
}

impl ServerConfig {
    pub fn from_settings(settings: &BrokerSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            tls: settings.server.tls_paths(),
            motd: settings.server.motd_lines(),
            max_send_queue: settings.server.max_send_queue,
            reaper_interval_ms: settings.sessions.heartbeat_interval_ms,
            max_idle_session_ms: settings.sessions.max_idle_session_ms,
            model_threads: settings.sessions.model_threads,
            max_concurrent_jobs: settings.sessions.max_concurrent_jobs,
            models_path: settings.catalog.storage_path.clone(),
            ..Self::default()
        }
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms.max(1))
    }

    pub fn max_idle_session(&self) -> Duration {
        Duration::from_millis(self.max_idle_session_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert!(cfg.tls.is_none());
        assert_eq!(cfg.max_idle_session(), Duration::from_secs(1800));
        assert_eq!(cfg.reaper_interval(), Duration::from_secs(5));
        assert_eq!(cfg.ping_interval(), Duration::from_secs(30));
        assert_eq!(cfg.client_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn from_settings_copies_every_section() {
        let mut settings = BrokerSettings::default();
        settings.server.port = 9000;
        settings.server.motd = Some("hello|  |world".into());
        settings.server.tls_key = Some("k.pem".into());
        settings.server.tls_cert = Some("c.pem".into());
        settings.sessions.heartbeat_interval_ms = 250;
        settings.sessions.max_concurrent_jobs = 7;
        settings.catalog.storage_path = "/srv/models".into();

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.motd, vec!["hello", "world"]);
        assert_eq!(cfg.tls, Some(("k.pem".into(), "c.pem".into())));
        assert_eq!(cfg.reaper_interval(), Duration::from_millis(250));
        assert_eq!(cfg.max_concurrent_jobs, 7);
        assert_eq!(cfg.models_path, PathBuf::from("/srv/models"));
        assert_eq!(cfg.ping_interval_secs, 30);
    }

    #[test]
    fn tls_needs_both_paths() {
        let mut settings = BrokerSettings::default();
        settings.server.tls_key = Some("k.pem".into());
        assert!(ServerConfig::from_settings(&settings).tls.is_none());
    }
}
