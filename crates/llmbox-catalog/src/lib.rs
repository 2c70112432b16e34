//! # llmbox-catalog
//!
//! Maintains the set of model assets the broker can serve:
//!
//! - [`ModelDescriptor`]: metadata for one asset, persisted as `models.json`
//! - [`ModelCatalog`]: shared, ordered descriptor list plus a readiness flag
//! - [`CatalogManager`]: one-shot startup job that fetches the remote feed,
//!   verifies local files and downloads missing or corrupt ones with retries

#![deny(unsafe_code)]

pub mod catalog;
pub mod descriptor;
pub mod download;
pub mod errors;
pub mod hash;
pub mod manager;

pub use catalog::ModelCatalog;
pub use descriptor::{ModelDescriptor, RemoteModelEntry};
pub use errors::CatalogError;
pub use hash::HashAlgorithm;
pub use manager::{CatalogConfig, CatalogManager};
