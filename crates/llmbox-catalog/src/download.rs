//! Streamed HTTP downloads.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::descriptor::RemoteModelEntry;
use crate::errors::CatalogError;

/// HTTP client for the descriptor feed and model files.
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("llmbox/", env!("CARGO_PKG_VERSION")))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Fetch and parse the remote descriptor feed.
    pub async fn fetch_feed(&self, url: &str) -> Result<Vec<RemoteModelEntry>, CatalogError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Stream `url` into `target` through a `.part` file.
    ///
    /// `target` is only replaced once the body has been fully written and
    /// flushed. Returns the number of bytes written.
    pub async fn download(&self, url: &str, target: &Path) -> Result<u64, CatalogError> {
        let part = part_path(target);
        let result = self.stream_to(url, &part).await;
        match result {
            Ok(written) => {
                tokio::fs::rename(&part, target)
                    .await
                    .map_err(|e| CatalogError::io(target, e))?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, part: &Path) -> Result<u64, CatalogError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(part)
            .await
            .map_err(|e| CatalogError::io(part, e))?;
        let mut written: u64 = 0;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk?;
            file.write_all(&bytes)
                .await
                .map_err(|e| CatalogError::io(part, e))?;
            written += bytes.len() as u64;
        }
        file.flush().await.map_err(|e| CatalogError::io(part, e))?;
        debug!(url, bytes = written, "download complete");
        Ok(written)
    }
}

fn part_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    target.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        }));
        format!("http://{addr}")
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/m/model.gguf")),
            PathBuf::from("/m/model.gguf.part")
        );
    }

    #[tokio::test]
    async fn download_writes_target() {
        let base = serve(Router::new().route("/m.bin", get(|| async { "model-bytes" }))).await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.bin");
        let n = Downloader::new()
            .download(&format!("{base}/m.bin"), &target)
            .await
            .unwrap();
        assert_eq!(n, 11);
        assert_eq!(std::fs::read(&target).unwrap(), b"model-bytes");
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn http_error_leaves_nothing_behind() {
        let base = serve(Router::new().route(
            "/m.bin",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "nope") }),
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.bin");
        let err = Downloader::new()
            .download(&format!("{base}/m.bin"), &target)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Status { status: 500, .. }));
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }

    #[tokio::test]
    async fn fetch_feed_parses_entries() {
        let body = r#"[{"name":"A","filename":"a.bin","md5sum":"00"}]"#;
        let base = serve(Router::new().route("/models.json", get(move || async move { body }))).await;
        let entries = Downloader::new()
            .fetch_feed(&format!("{base}/models.json"))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].filename, "a.bin");
    }
}
