//! Catalog error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building the model catalog.
///
/// Everything except [`CatalogError::Empty`] is scoped to a single asset:
/// the manager logs it, skips that asset and carries on with the rest.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("invalid descriptor list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("refusing unsafe model file name {0:?}")]
    InvalidFilename(String),

    #[error("hash mismatch for {filename}: expected {expected}, got {actual}")]
    HashMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("unsupported hash {0:?} (expected 32 or 64 hex characters)")]
    UnsupportedHash(String),

    #[error("{name}: giving up after {attempts} download attempts")]
    RetriesExhausted { name: String, attempts: u32 },

    #[error("no model could be validated")]
    Empty,
}

impl CatalogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
