//! Record-type registry
//!
//! Maps design keys (`sites`, `device_types`) to record types, and type names
//! to schemas for child creation.

use crate::config::BuilderConfig;
use design_store::{ModelSchema, Store};
use indexmap::IndexMap;
use std::sync::Arc;

/// Registry of addressable record types
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    by_key: IndexMap<String, Arc<ModelSchema>>,
    by_name: IndexMap<String, Arc<ModelSchema>>,
}

impl ModelRegistry {
    /// Build from a store's catalog
    ///
    /// Types from excluded apps are not addressable by design key but remain
    /// available by name, so relationships can still reach them.
    #[must_use]
    pub fn from_store(store: &dyn Store, config: &BuilderConfig) -> Self {
        Self::from_catalog(store.catalog(), config)
    }

    /// Build from an explicit catalog
    #[must_use]
    pub fn from_catalog(catalog: impl IntoIterator<Item = ModelSchema>, config: &BuilderConfig) -> Self {
        let mut registry = Self::default();
        for schema in catalog {
            registry.register(schema, config);
        }
        tracing::debug!(
            "Registered {} record types ({} addressable)",
            registry.by_name.len(),
            registry.by_key.len()
        );
        registry
    }

    fn register(&mut self, schema: ModelSchema, config: &BuilderConfig) {
        let schema = Arc::new(schema);
        if !config.is_excluded(&schema.app_label) {
            self.by_key.insert(schema.plural_key(), Arc::clone(&schema));
        }
        self.by_name.insert(schema.name.clone(), schema);
    }

    /// Schema for a design key
    #[must_use]
    pub fn by_key(&self, key: &str) -> Option<&Arc<ModelSchema>> {
        self.by_key.get(key)
    }

    /// Schema for a type name
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<&Arc<ModelSchema>> {
        self.by_name.get(name)
    }

    /// Whether `key` is an addressable design key
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    /// Addressable design keys, in catalog order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.by_key.keys().map(String::as_str)
    }

    /// Number of addressable types
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// No addressable types
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
