//! Startup job that turns the descriptor feed into a verified catalog.
//!
//! 1. Ensure the storage directory exists
//! 2. Load `models.json` from storage, or fetch the remote feed and persist it
//! 3. Resolve every descriptor: keep a local file whose hash matches,
//!    otherwise download with bounded retries and re-verify
//! 4. Publish the descriptors that resolved; an empty result leaves the
//!    catalog not ready
//!
//! A failing descriptor is logged and skipped; the others are unaffected.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Url;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::catalog::ModelCatalog;
use crate::descriptor::ModelDescriptor;
use crate::download::Downloader;
use crate::errors::CatalogError;
use crate::hash::{HashAlgorithm, file_matches, verify_file};

/// Name of the persisted descriptor list inside the storage directory.
pub const DESCRIPTOR_FILE: &str = "models.json";

#[derive(Clone, Debug)]
pub struct CatalogConfig {
    pub source_url: String,
    pub storage_path: PathBuf,
    /// `false` accepts any existing file without hashing it.
    pub verify_hashes: bool,
    pub download_attempts: u32,
    /// Descriptors resolved concurrently.
    pub parallel_downloads: usize,
}

pub struct CatalogManager {
    config: CatalogConfig,
    catalog: Arc<ModelCatalog>,
    downloader: Downloader,
}

impl CatalogManager {
    pub fn new(config: CatalogConfig, catalog: Arc<ModelCatalog>) -> Self {
        Self {
            config,
            catalog,
            downloader: Downloader::new(),
        }
    }

    /// Build and publish the catalog. Returns the published descriptors.
    pub async fn run(&self) -> Result<Vec<ModelDescriptor>, CatalogError> {
        let storage = &self.config.storage_path;
        tokio::fs::create_dir_all(storage)
            .await
            .map_err(|e| CatalogError::io(storage, e))?;

        let descriptors = match self.load_descriptors().await {
            Ok(d) => d,
            Err(e) => {
                error!(error = %e, "failed to load model descriptors, catalog stays not ready");
                return Err(e);
            }
        };
        info!(count = descriptors.len(), "resolving model catalog");

        // At most `parallel_downloads` descriptors resolve at once.
        let slots = Semaphore::new(self.config.parallel_downloads.max(1));
        let jobs: Vec<_> = descriptors
            .into_iter()
            .map(|d| {
                let slots = &slots;
                async move {
                    let _slot = slots.acquire().await;
                    let result = self.resolve(&d).await;
                    (d, result)
                }
            })
            .collect();
        let resolved = futures::future::join_all(jobs).await;

        let mut ready = Vec::with_capacity(resolved.len());
        for (descriptor, result) in resolved {
            match result {
                Ok(()) => ready.push(descriptor),
                Err(e) => warn!(model = %descriptor.name, error = %e, "skipping model"),
            }
        }

        if ready.is_empty() {
            error!("no model could be validated, catalog stays not ready");
            return Err(CatalogError::Empty);
        }

        info!(models = ready.len(), "model catalog ready");
        self.catalog.publish(ready.clone());
        Ok(ready)
    }

    /// Persisted list if present and non-empty, otherwise the remote feed.
    async fn load_descriptors(&self) -> Result<Vec<ModelDescriptor>, CatalogError> {
        let path = self.config.storage_path.join(DESCRIPTOR_FILE);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| CatalogError::io(&path, e))?;
            let persisted: Vec<ModelDescriptor> = serde_json::from_str(&content)?;
            if !persisted.is_empty() {
                debug!(path = %path.display(), count = persisted.len(), "using persisted descriptors");
                return Ok(persisted);
            }
        }

        let feed_url = Url::parse(&self.config.source_url).map_err(|e| CatalogError::InvalidUrl {
            url: self.config.source_url.clone(),
            reason: e.to_string(),
        })?;
        info!(url = %feed_url, "fetching model feed");
        let entries = self.downloader.fetch_feed(feed_url.as_str()).await?;

        let mut descriptors = Vec::with_capacity(entries.len());
        for entry in entries {
            let name = entry.name.clone();
            match entry.into_descriptor(&feed_url) {
                Ok(d) => descriptors.push(d),
                Err(e) => warn!(model = %name, error = %e, "dropping feed entry"),
            }
        }

        let json = serde_json::to_string_pretty(&descriptors)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| CatalogError::io(&path, e))?;
        Ok(descriptors)
    }

    async fn resolve(&self, descriptor: &ModelDescriptor) -> Result<(), CatalogError> {
        descriptor.check_filename()?;
        let path = self.config.storage_path.join(&descriptor.filename);
        let verify = self.config.verify_hashes;

        if verify {
            let _ = HashAlgorithm::for_digest(&descriptor.hash)?;
            if file_matches(&path, &descriptor.hash).await? {
                debug!(model = %descriptor.name, "local file verified");
                return Ok(());
            }
        } else if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(model = %descriptor.name, "local file present, verification bypassed");
            return Ok(());
        }

        let attempts = self.config.download_attempts.max(1);
        let mut mismatch = None;
        for attempt in 1..=attempts {
            info!(model = %descriptor.name, attempt, url = %descriptor.url, "downloading model");
            if let Err(e) = self.downloader.download(&descriptor.url, &path).await {
                warn!(model = %descriptor.name, attempt, error = %e, "download failed");
                continue;
            }
            if !verify {
                return Ok(());
            }
            match verify_file(&path, &descriptor.filename, &descriptor.hash).await {
                Ok(()) => return Ok(()),
                Err(e @ CatalogError::HashMismatch { .. }) => {
                    warn!(model = %descriptor.name, attempt, error = %e, "downloaded file failed hash check");
                    let _ = tokio::fs::remove_file(&path).await;
                    mismatch = Some(e);
                }
                Err(e) => warn!(model = %descriptor.name, attempt, error = %e, "hash check failed"),
            }
        }

        // The last digest mismatch, if any, outranks the retry count.
        Err(mismatch.unwrap_or_else(|| CatalogError::RetriesExhausted {
            name: descriptor.name.clone(),
            attempts,
        }))
    }
}
