//! Adapter registry
//!
//! Maps the adapter type identifiers sent by the ad server to factories.
//! The registry is populated at startup; an identifier nobody registered is
//! a typed error rather than a runtime lookup failure.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, info};

use crate::core::{AdapterError, ManagerError, ManagerResult};

use super::{guarded, RewardedAdapter};

/// Factory building a fresh adapter instance.
pub type AdapterCreateFn =
    Arc<dyn Fn() -> Result<Box<dyn RewardedAdapter>, AdapterError> + Send + Sync>;

/// Registry of adapter factories keyed by adapter type identifier
#[derive(Default)]
pub struct AdapterRegistry {
    factories: DashMap<String, AdapterCreateFn>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Builder-style registration, for wiring the registry at startup
    pub fn with_adapter<F>(self, adapter_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn RewardedAdapter>, AdapterError> + Send + Sync + 'static,
    {
        self.register(adapter_type, factory);
        self
    }

    /// Insert or replace the factory for an adapter type
    pub fn register<F>(&self, adapter_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn RewardedAdapter>, AdapterError> + Send + Sync + 'static,
    {
        let adapter_type = adapter_type.into();
        debug!("Registering adapter type: {}", adapter_type);
        self.factories.insert(adapter_type, Arc::new(factory));
    }

    /// Remove an adapter type
    pub fn remove(&self, adapter_type: &str) -> Option<AdapterCreateFn> {
        debug!("Removing adapter type: {}", adapter_type);
        self.factories.remove(adapter_type).map(|(_, f)| f)
    }

    /// Resolve the factory for an adapter type
    pub fn resolve(&self, adapter_type: &str) -> ManagerResult<AdapterCreateFn> {
        self.factories
            .get(adapter_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ManagerError::AdapterNotFound(adapter_type.to_string()))
    }

    /// Resolve and construct an adapter.
    ///
    /// A factory that errors or panics is reported as `ManagerError::Adapter`.
    pub fn instantiate(&self, adapter_type: &str) -> ManagerResult<Box<dyn RewardedAdapter>> {
        let factory = self.resolve(adapter_type)?;
        let adapter = guarded("construct", || factory())?;
        info!("Instantiated adapter of type {}", adapter_type);
        Ok(adapter)
    }

    /// Get all registered adapter types
    pub fn list_adapter_types(&self) -> Vec<String> {
        self.factories.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}
