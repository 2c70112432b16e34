use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::descriptor::ModelDescriptor;

/// Shared catalog state read by request handlers.
///
/// Starts empty and not ready. [`ModelCatalog::publish`] installs the
/// validated descriptor list and flips readiness in one step; readiness
/// never goes back to `false`.
#[derive(Debug, Default)]
pub struct ModelCatalog {
    models: RwLock<Vec<ModelDescriptor>>,
    ready: AtomicBool,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current descriptors, in catalog order. Empty until ready.
    pub fn snapshot(&self) -> Vec<ModelDescriptor> {
        self.models.read().clone()
    }

    /// Look up a ready descriptor by display name or file name.
    pub fn find(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.read().iter().find(|d| d.matches(name)).cloned()
    }

    /// First descriptor in catalog order.
    pub fn first(&self) -> Option<ModelDescriptor> {
        self.models.read().first().cloned()
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }

    /// Install the validated list and mark the catalog ready.
    pub fn publish(&self, models: Vec<ModelDescriptor>) {
        *self.models.write() = models;
        self.ready.store(true, Ordering::Release);
    }
}
