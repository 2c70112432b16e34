//! Shared state reachable from every connection task.

use std::sync::Arc;
use std::time::Instant;

use llmbox_catalog::ModelCatalog;
use llmbox_core::EngineLoader;

use crate::admission::JobAdmission;
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::store::SessionStore;

#[derive(Clone)]
pub struct BrokerState {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub store: Arc<SessionStore>,
    pub catalog: Arc<ModelCatalog>,
    pub admission: Arc<JobAdmission>,
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
}

impl BrokerState {
    pub fn new(
        config: ServerConfig,
        catalog: Arc<ModelCatalog>,
        loader: Arc<dyn EngineLoader>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let admission = Arc::new(JobAdmission::new(
            config.max_concurrent_jobs,
            Arc::clone(&registry),
        ));
        Self {
            config: Arc::new(config),
            registry,
            store: Arc::new(SessionStore::new(loader)),
            catalog,
            admission,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }
}
