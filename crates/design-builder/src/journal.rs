//! Provenance journal
//!
//! Records which records a build created and which it updated. Each record
//! identity is logged at most once, so it appears in exactly one of the two
//! lists, decided by the first time it was saved.

use crate::error::BuildError;
use crate::node::ModelNode;
use crate::registry::ModelRegistry;
use design_store::{Record, RecordId, RecordRef, Store};
use indexmap::{IndexMap, IndexSet};
use std::collections::HashSet;

/// Identities grouped by record type name
pub type JournalEntries = IndexMap<String, IndexSet<RecordId>>;

/// Provenance journal for one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Journal {
    visited: HashSet<RecordId>,
    created: JournalEntries,
    updated: JournalEntries,
}

impl Journal {
    /// Create empty journal
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Log a node's backing record
    ///
    /// Returns `false` when the node has no saved record or the record was
    /// already logged.
    pub fn log(&mut self, node: &ModelNode) -> bool {
        node.record()
            .is_some_and(|record| self.log_record(record, node.is_created()))
    }

    /// Log a saved record as created or updated
    pub fn log_record(&mut self, record: &Record, created: bool) -> bool {
        let Some(id) = record.id() else {
            return false;
        };
        if !self.visited.insert(id) {
            return false;
        }

        let entries = if created {
            &mut self.created
        } else {
            &mut self.updated
        };
        entries.entry(record.model().to_string()).or_default().insert(id);
        true
    }

    /// Created identities by type name
    #[inline]
    #[must_use]
    pub fn created(&self) -> &JournalEntries {
        &self.created
    }

    /// Updated identities by type name
    #[inline]
    #[must_use]
    pub fn updated(&self) -> &JournalEntries {
        &self.updated
    }

    /// Whether `id` has been logged
    #[must_use]
    pub fn contains(&self, id: &RecordId) -> bool {
        self.visited.contains(id)
    }

    /// Whether `id` was logged as created
    #[must_use]
    pub fn was_created(&self, id: &RecordId) -> bool {
        self.created.values().any(|ids| ids.contains(id))
    }

    /// Number of logged identities
    #[must_use]
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    /// Nothing logged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    /// Created records, re-fetched, grouped by lower-cased type label
    ///
    /// # Errors
    ///
    /// Fails if a journaled record can no longer be fetched.
    pub fn created_objects(
        &self,
        store: &dyn Store,
        registry: &ModelRegistry,
    ) -> Result<IndexMap<String, Vec<Record>>, BuildError> {
        Self::project(&self.created, store, registry)
    }

    /// Updated records, re-fetched, grouped by lower-cased type label
    ///
    /// # Errors
    ///
    /// Fails if a journaled record can no longer be fetched.
    pub fn updated_objects(
        &self,
        store: &dyn Store,
        registry: &ModelRegistry,
    ) -> Result<IndexMap<String, Vec<Record>>, BuildError> {
        Self::project(&self.updated, store, registry)
    }

    fn project(
        entries: &JournalEntries,
        store: &dyn Store,
        registry: &ModelRegistry,
    ) -> Result<IndexMap<String, Vec<Record>>, BuildError> {
        let mut objects: IndexMap<String, Vec<Record>> = IndexMap::new();
        for (model, ids) in entries {
            let label = registry
                .by_name(model)
                .map_or_else(|| model.to_lowercase(), |schema| schema.label());
            let records = objects.entry(label).or_default();
            for id in ids {
                records.push(store.fetch(&RecordRef::new(model.clone(), *id))?);
            }
        }
        Ok(objects)
    }
}
