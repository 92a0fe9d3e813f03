//! The design builder
//!
//! Owns the store handle, the record-type registry, the registered
//! extensions and the journal, and turns a [`Design`] into store operations.

use crate::config::BuilderConfig;
use crate::design::Design;
use crate::directive::ValueRef;
use crate::error::BuildError;
use crate::extension::{Extension, ExtensionKind, ExtensionRegistry, ReferenceExtension};
use crate::journal::Journal;
use crate::node::{ModelNode, NodeContext};
use crate::registry::ModelRegistry;
use design_store::{AttributeMap, ModelSchema, Record, Store, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// The design builder
pub struct Builder {
    store: Arc<dyn Store>,
    registry: Arc<ModelRegistry>,
    config: BuilderConfig,
    extensions: ExtensionRegistry,
    references: ReferenceExtension,
    journal: Journal,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("extensions", &self.extensions)
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`Builder`]
pub struct BuilderBuilder {
    store: Arc<dyn Store>,
    config: BuilderConfig,
    registry: Option<Arc<ModelRegistry>>,
    extensions: Vec<Box<dyn Extension>>,
}

impl BuilderBuilder {
    /// With configuration
    #[must_use]
    pub fn config(mut self, config: BuilderConfig) -> Self {
        self.config = config;
        self
    }

    /// With a pre-built registry instead of one derived from the store
    #[must_use]
    pub fn registry(mut self, registry: Arc<ModelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Register an extension
    #[must_use]
    pub fn extension(mut self, extension: impl Extension + 'static) -> Self {
        self.extensions.push(Box::new(extension));
        self
    }

    /// Register a boxed extension
    #[must_use]
    pub fn boxed_extension(mut self, extension: Box<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Assemble the builder
    ///
    /// # Errors
    ///
    /// [`BuildError::Config`] for invalid settings or duplicate extension
    /// tags.
    pub fn build(self) -> Result<Builder, BuildError> {
        self.config.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ModelRegistry::from_store(self.store.as_ref(), &self.config)));

        let references = ReferenceExtension::new();
        let mut extensions = ExtensionRegistry::new();
        extensions.register(Box::new(references.clone()))?;
        for extension in self.extensions {
            extensions.register(extension)?;
        }

        Ok(Builder {
            store: self.store,
            registry,
            config: self.config,
            extensions,
            references,
            journal: Journal::new(),
        })
    }
}

impl Builder {
    /// Fluent construction
    #[must_use]
    pub fn builder(store: Arc<dyn Store>) -> BuilderBuilder {
        BuilderBuilder {
            store,
            config: BuilderConfig::default(),
            registry: None,
            extensions: Vec::new(),
        }
    }

    /// Builder with default configuration and only the built-in extensions
    ///
    /// # Errors
    ///
    /// See [`BuilderBuilder::build`].
    pub fn new(store: Arc<dyn Store>) -> Result<Self, BuildError> {
        Self::builder(store).build()
    }

    /// Implement a design
    ///
    /// Every entry is resolved and saved in document order. On success the
    /// extensions' `commit` hooks run when `commit` is set, their
    /// `roll_back` hooks otherwise. Any failure runs `roll_back` once and
    /// returns the error that stopped it.
    ///
    /// # Errors
    ///
    /// [`BuildError::EmptyDesign`] for an empty design (no hooks run), or
    /// the first error raised while implementing it.
    pub fn implement_design(&mut self, design: &Design, commit: bool) -> Result<(), BuildError> {
        if design.is_empty() {
            return Err(BuildError::EmptyDesign);
        }

        self.journal = Journal::new();
        tracing::info!("Implementing design with {} entries", design.len());

        if let Err(err) = self.implement_entries(design) {
            self.abort(&err);
            return Err(err);
        }

        if commit {
            if let Err(err) = self.commit() {
                self.abort(&err);
                return Err(err);
            }
            tracing::info!(
                "Design committed: {} records journaled",
                self.journal.len()
            );
            Ok(())
        } else {
            tracing::info!("Design not committed, rolling back extensions");
            self.roll_back()
        }
    }

    fn implement_entries(&mut self, design: &Design) -> Result<(), BuildError> {
        for (key, value) in design.iter() {
            let schema = match self.registry.by_key(key) {
                Some(schema) if !value.is_empty() => Arc::clone(schema),
                _ => {
                    return Err(BuildError::UnknownModelKey {
                        key: key.to_string(),
                    })
                }
            };
            tracing::debug!("Implementing {key}");

            match value {
                Value::Map(attributes) => self.implement_entry(&schema, attributes)?,
                Value::List(items) => {
                    for item in items {
                        let Value::Map(attributes) = item else {
                            return Err(BuildError::implementation(
                                schema.name.clone(),
                                format!("{key} entries must be mappings, got {}", item.type_name()),
                            ));
                        };
                        self.implement_entry(&schema, attributes)?;
                    }
                }
                other => {
                    return Err(BuildError::implementation(
                        schema.name.clone(),
                        format!(
                            "{key} must be a mapping or a list of mappings, got {}",
                            other.type_name()
                        ),
                    ))
                }
            }
        }
        Ok(())
    }

    fn implement_entry(
        &mut self,
        schema: &Arc<ModelSchema>,
        attributes: &AttributeMap,
    ) -> Result<(), BuildError> {
        let mut node = ModelNode::build(self, Arc::clone(schema), attributes, NodeContext::root())?;
        node.save(self)
    }

    fn abort(&mut self, cause: &BuildError) {
        tracing::error!("Design implementation failed: {cause}");
        if let Err(err) = self.roll_back() {
            tracing::warn!("Roll back after failure did not complete: {err}");
        }
    }

    /// Resolve a `!tag:arg` string through its value extension
    ///
    /// Anything else is returned unchanged.
    ///
    /// # Errors
    ///
    /// [`BuildError::UnknownValueExtension`] when no value extension is
    /// registered for the tag, or the extension's own error.
    pub fn resolve_value(&mut self, value: &Value) -> Result<Value, BuildError> {
        if let Value::String(text) = value {
            if let Some(reference) = ValueRef::parse(text) {
                let extension = self
                    .extensions
                    .value_mut(reference.tag)
                    .ok_or_else(|| BuildError::UnknownValueExtension(reference.tag.to_string()))?;
                return extension.value(reference.arg);
            }
        }
        Ok(value.clone())
    }

    /// Resolve a value, or each direct element of a list or mapping
    ///
    /// Returns a copy; nested collections are not descended into.
    ///
    /// # Errors
    ///
    /// See [`Builder::resolve_value`].
    pub fn resolve_values(&mut self, value: &Value) -> Result<Value, BuildError> {
        match value {
            Value::List(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(key, item)| Ok((key.clone(), self.resolve_value(item)?)))
                .collect::<Result<AttributeMap, BuildError>>()
                .map(Value::Map),
            other => self.resolve_value(other),
        }
    }

    /// Extension registered for a capability and tag
    pub fn get_extension(&mut self, kind: ExtensionKind, tag: &str) -> Option<&mut dyn Extension> {
        self.extensions.get_mut(kind, tag)
    }

    /// Run every extension's `commit` hook
    ///
    /// # Errors
    ///
    /// [`BuildError::Hooks`] listing every failing extension.
    pub fn commit(&mut self) -> Result<(), BuildError> {
        tracing::debug!("Committing {} extensions", self.extensions.len());
        self.extensions.commit_all().into_result()?;
        Ok(())
    }

    /// Run every extension's `roll_back` hook
    ///
    /// # Errors
    ///
    /// [`BuildError::Hooks`] listing every failing extension.
    pub fn roll_back(&mut self) -> Result<(), BuildError> {
        tracing::debug!("Rolling back {} extensions", self.extensions.len());
        self.extensions.roll_back_all().into_result()?;
        Ok(())
    }

    pub(crate) fn log_node(&mut self, node: &ModelNode) {
        if node.is_created() || self.config.journal_updates {
            self.journal.log(node);
        }
    }

    /// Journal of the last build
    #[inline]
    #[must_use]
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Take the journal, leaving an empty one
    pub fn take_journal(&mut self) -> Journal {
        std::mem::take(&mut self.journal)
    }

    /// Records created by the last build, grouped by type label
    ///
    /// # Errors
    ///
    /// Fails if a journaled record can no longer be fetched.
    pub fn created_objects(&self) -> Result<IndexMap<String, Vec<Record>>, BuildError> {
        self.journal.created_objects(self.store(), &self.registry)
    }

    /// Records updated by the last build, grouped by type label
    ///
    /// # Errors
    ///
    /// Fails if a journaled record can no longer be fetched.
    pub fn updated_objects(&self) -> Result<IndexMap<String, Vec<Record>>, BuildError> {
        self.journal.updated_objects(self.store(), &self.registry)
    }

    /// Record named with `!ref`, if any
    #[must_use]
    pub fn reference(&self, name: &str) -> Option<Record> {
        self.references.get(name)
    }

    /// Record-type registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Store handle
    #[inline]
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Registered extensions
    #[inline]
    #[must_use]
    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    pub(crate) fn extensions_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.extensions
    }
}
