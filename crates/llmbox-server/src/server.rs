//! `BrokerServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use llmbox_catalog::ModelCatalog;
use llmbox_core::EngineLoader;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::protocol::{self, CLOSE_GOING_AWAY};
use crate::reaper;
use crate::state::BrokerState;
use crate::websocket::run_ws_session;

/// Notice broadcast to every client before the broker goes down.
pub const SHUTDOWN_NOTICE: &str = "The server is going offline immediately!";

/// Grace period for in-flight HTTP connections once the listener stops.
const LISTENER_GRACE: Duration = Duration::from_secs(5);

pub struct BrokerServer {
    state: BrokerState,
}

impl BrokerServer {
    pub fn new(
        config: ServerConfig,
        catalog: Arc<ModelCatalog>,
        loader: Arc<dyn EngineLoader>,
    ) -> Self {
        Self {
            state: BrokerState::new(config, catalog, loader),
        }
    }

    pub fn state(&self) -> &BrokerState {
        &self.state
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let config = &self.state.config;
        let addr = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .map_err(|e| ServerError::Address(format!("{}: {e}", config.host)))?
            .next()
            .ok_or_else(|| ServerError::Address(config.host.clone()))?;

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let token = self.state.shutdown.token();

        match &config.tls {
            None => {
                let listener = tokio::net::TcpListener::bind(addr)
                    .await
                    .map_err(|e| ServerError::bind(&addr, e))?;
                let local = listener.local_addr()?;
                info!(addr = %local, tls = false, "llmbox listening");

                let handle = tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app)
                        .with_graceful_shutdown(token.cancelled_owned())
                        .await
                    {
                        error!(error = %e, "server stopped with error");
                    }
                });
                Ok((local, handle))
            }
            Some((key, cert)) => {
                // Several providers may be compiled in; pin ring.
                let _ = rustls::crypto::ring::default_provider().install_default();
                let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                    .await
                    .map_err(|e| ServerError::Tls(e.to_string()))?;

                let listener =
                    std::net::TcpListener::bind(addr).map_err(|e| ServerError::bind(&addr, e))?;
                listener.set_nonblocking(true)?;
                let local = listener.local_addr()?;
                info!(addr = %local, tls = true, "llmbox listening");

                let server_handle = axum_server::Handle::new();
                let stopper = server_handle.clone();
                drop(tokio::spawn(async move {
                    token.cancelled().await;
                    stopper.graceful_shutdown(Some(LISTENER_GRACE));
                }));

                let handle = tokio::spawn(async move {
                    if let Err(e) = axum_server::from_tcp_rustls(listener, tls)
                        .handle(server_handle)
                        .serve(app)
                        .await
                    {
                        error!(error = %e, "server stopped with error");
                    }
                });
                Ok((local, handle))
            }
        }
    }

    /// Start the periodic session sweep.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        reaper::spawn_reaper(
            Arc::clone(&self.state.store),
            self.state.config.reaper_interval(),
            self.state.shutdown.token(),
        )
    }

    /// Push the now-ready catalog to every client that has not seen it.
    pub fn push_catalog(&self) -> usize {
        let models = self.state.catalog.snapshot();
        let pushed = self.state.registry.push_catalog(&models);
        info!(models = models.len(), clients = pushed, "catalog pushed");
        pushed
    }

    /// Notify clients, close every connection, destroy all sessions and
    /// wait for `handles` to stop.
    pub async fn shutdown_gracefully(&self, handles: Vec<JoinHandle<()>>) {
        let state = &self.state;
        let notified = state
            .registry
            .broadcast_system(&protocol::text_notice(SHUTDOWN_NOTICE));
        let closed = state.registry.close_all(CLOSE_GOING_AWAY, "server shutdown");
        let destroyed = state.store.destroy_all();
        info!(notified, closed, destroyed, "shutting down");

        state.shutdown.graceful_shutdown(handles, None).await;
    }
}

/// GET /ws
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<BrokerState>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    ws.on_upgrade(move |socket| run_ws_session(socket, peer, state))
}

/// GET /health
async fn health_handler(State(state): State<BrokerState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.len(),
        state.store.len(),
        state.catalog.is_ready(),
    ))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use llmbox_core::mock::MockEngineLoader;
    use tower::ServiceExt;

    use super::*;

    fn make_server() -> BrokerServer {
        BrokerServer::new(
            ServerConfig::default(),
            Arc::new(ModelCatalog::new()),
            Arc::new(MockEngineLoader::new()),
        )
    }

    #[tokio::test]
    async fn health_endpoint_reports_counters() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["sessions"], 0);
        assert_eq!(parsed["catalog_ready"], false);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let server = make_server();
        let resp = server
            .router()
            .oneshot(Request::builder().uri("/nonexistent").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listen_binds_ephemeral_port_and_stops_on_shutdown() {
        let server = make_server();
        let (addr, handle) = server.listen().await.unwrap();
        assert_ne!(addr.port(), 0);

        let reaper = server.spawn_reaper();
        server.shutdown_gracefully(vec![handle, reaper]).await;
        assert!(server.state().shutdown.is_shutting_down());
    }

    #[tokio::test]
    async fn missing_tls_files_fail_startup() {
        let config = ServerConfig {
            tls: Some(("/nonexistent/key.pem".into(), "/nonexistent/cert.pem".into())),
            ..ServerConfig::default()
        };
        let server = BrokerServer::new(
            config,
            Arc::new(ModelCatalog::new()),
            Arc::new(MockEngineLoader::new()),
        );
        assert!(matches!(server.listen().await, Err(ServerError::Tls(_))));
    }
}
