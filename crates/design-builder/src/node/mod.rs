//! Node resolver
//!
//! A [`ModelNode`] interprets one attribute mapping for one record type:
//!
//! 1. **Parse**: directives, value resolution, action selection
//!    ([`parse`](self::parse))
//! 2. **Load**: look up the existing record or construct a new one
//!    ([`load`](self::load))
//! 3. **Apply**: assign fields; relationships to the record's own id are
//!    deferred until after it is saved ([`fields`](self::fields))
//! 4. **Save**: validate, persist, journal, fire lifecycle handlers

use crate::builder::Builder;
use crate::directive::Action;
use crate::error::{BuildError, DesignValidationError};
use design_store::{
    AttributeMap, CustomRelationship, ModelSchema, Record, RecordRef, RelationScope, Store,
    StoreError, Value,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod fields;
mod load;
mod parse;

use fields::Deferred;

/// Lifecycle events a node fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Backing record first obtained (any action)
    Loaded,
    /// Before validate-and-save
    PreSave,
    /// Right after the record is saved and refreshed
    PostInstanceSave,
    /// After all post-instance-save work
    PostSave,
}

impl LifecycleEvent {
    /// Fired once the record is persisted, so the stored copy is authoritative
    #[must_use]
    pub fn is_post_save(self) -> bool {
        matches!(self, Self::PostInstanceSave | Self::PostSave)
    }
}

/// Lifecycle handler
///
/// Receives the node's backing record and the store. After a post-save
/// handler the record is refreshed from the store; `Loaded` and `PreSave`
/// handlers see and keep the pending in-memory changes.
pub type Handler = Box<dyn FnMut(&mut Record, &dyn Store) -> Result<(), BuildError>>;

enum HandlerEntry {
    Callback(Handler),
    Related(Deferred),
}

/// Where a node sits in the design tree
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeContext {
    /// Ancestor record type names, outermost first
    pub(crate) lineage: Vec<String>,
    /// Relationship cursor for scoped lookups
    pub(crate) scope: Option<RelationScope>,
    /// Fields set on the record before design attributes
    pub(crate) preset: AttributeMap,
}

impl NodeContext {
    pub(crate) fn root() -> Self {
        Self::default()
    }
}

/// Resolver state for one record
pub struct ModelNode {
    schema: Arc<ModelSchema>,
    relationships: Vec<CustomRelationship>,
    lineage: Vec<String>,
    scope: Option<RelationScope>,
    preset: AttributeMap,
    action: Option<Action>,
    filter: AttributeMap,
    attributes: AttributeMap,
    kwargs: AttributeMap,
    custom_fields: AttributeMap,
    deferred: bool,
    record: Option<Record>,
    created: bool,
    handlers: HashMap<LifecycleEvent, Vec<HandlerEntry>>,
}

impl fmt::Debug for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelNode")
            .field("model", &self.schema.name)
            .field("action", &self.action)
            .field("filter", &self.filter)
            .field("attributes", &self.attributes)
            .field("record", &self.record)
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.record {
            Some(record) => write!(f, "{} {record}", self.schema.name),
            None => write!(f, "{} (unsaved)", self.schema.name),
        }
    }
}

impl ModelNode {
    fn empty(
        schema: Arc<ModelSchema>,
        relationships: Vec<CustomRelationship>,
        context: NodeContext,
    ) -> Self {
        Self {
            schema,
            relationships,
            lineage: context.lineage,
            scope: context.scope,
            preset: context.preset,
            action: None,
            filter: AttributeMap::new(),
            attributes: AttributeMap::new(),
            kwargs: AttributeMap::new(),
            custom_fields: AttributeMap::new(),
            deferred: false,
            record: None,
            created: false,
            handlers: HashMap::new(),
        }
    }

    /// Parse, load and apply fields; the node is ready to [`save`](Self::save)
    pub(crate) fn build(
        builder: &mut Builder,
        schema: Arc<ModelSchema>,
        attributes: &AttributeMap,
        context: NodeContext,
    ) -> Result<Self, BuildError> {
        let max = builder.config().max_depth;
        if context.lineage.len() >= max {
            let mut path = context.lineage.clone();
            path.push(schema.name.clone());
            return Err(BuildError::DepthExceeded {
                max,
                path: path.join(" -> "),
            });
        }

        let relationships = builder.store().relationships(&schema.name);
        let mut node = Self::empty(schema, relationships, context);
        node.parse_attributes(builder, attributes.clone())?;
        tracing::debug!("Resolving {} with action {}", node.schema.name, node.action());
        node.load_instance(builder)?;
        node.fire(LifecycleEvent::Loaded, builder)?;
        node.update_fields(builder)?;
        Ok(node)
    }

    /// Build a node for a related record type
    ///
    /// Lookup failures become implementation errors naming the type and
    /// criteria.
    pub(crate) fn create_child(
        &self,
        builder: &mut Builder,
        related: &str,
        attributes: &AttributeMap,
        scope: Option<RelationScope>,
        preset: AttributeMap,
    ) -> Result<Self, BuildError> {
        child_node(builder, self.child_lineage(), related, attributes, scope, preset)
    }

    fn child_lineage(&self) -> Vec<String> {
        let mut lineage = self.lineage.clone();
        lineage.push(self.schema.name.clone());
        lineage
    }

    /// Record type name
    #[inline]
    #[must_use]
    pub fn model(&self) -> &str {
        &self.schema.name
    }

    /// Record type schema
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    /// Custom relationships the record type takes part in
    #[must_use]
    pub fn relationships(&self) -> &[CustomRelationship] {
        &self.relationships
    }

    fn custom_relationship(&self, slug: &str) -> Option<&CustomRelationship> {
        self.relationships
            .iter()
            .find(|relationship| relationship.slug == slug)
    }

    /// Resolved action; `Create` until an action directive is seen
    #[inline]
    #[must_use]
    pub fn action(&self) -> Action {
        self.action.unwrap_or_default()
    }

    /// Filter criteria used to locate the record
    #[inline]
    #[must_use]
    pub fn filter(&self) -> &AttributeMap {
        &self.filter
    }

    /// Pending field assignments
    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &AttributeMap {
        &self.attributes
    }

    /// Set a field assignment
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Constructor arguments that match no declared field
    #[inline]
    #[must_use]
    pub fn kwargs(&self) -> &AttributeMap {
        &self.kwargs
    }

    /// Custom field values
    #[inline]
    #[must_use]
    pub fn custom_fields(&self) -> &AttributeMap {
        &self.custom_fields
    }

    /// Whether the design marked this node `deferred`
    #[inline]
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Backing record, once loaded
    #[inline]
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        self.record.as_ref()
    }

    /// Identity of the backing record, once saved
    #[must_use]
    pub fn reference(&self) -> Option<RecordRef> {
        self.record.as_ref().and_then(Record::reference)
    }

    /// Whether the record was constructed in this build and not yet saved
    #[inline]
    #[must_use]
    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Immediate parent record type, if any
    #[must_use]
    pub fn parent(&self) -> Option<&str> {
        self.lineage.last().map(String::as_str)
    }

    /// Ancestor record type names, outermost first
    #[must_use]
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Relationship cursor, for nodes created through a relationship
    #[must_use]
    pub fn scope(&self) -> Option<&RelationScope> {
        self.scope.as_ref()
    }

    /// Attach a lifecycle handler
    pub fn on<F>(&mut self, event: LifecycleEvent, handler: F)
    where
        F: FnMut(&mut Record, &dyn Store) -> Result<(), BuildError> + 'static,
    {
        self.handlers
            .entry(event)
            .or_default()
            .push(HandlerEntry::Callback(Box::new(handler)));
    }

    fn defer(&mut self, deferred: Deferred) {
        self.handlers
            .entry(LifecycleEvent::PostInstanceSave)
            .or_default()
            .push(HandlerEntry::Related(deferred));
    }

    fn implementation_error(&self, message: impl Into<String>) -> BuildError {
        BuildError::implementation(self.schema.name.clone(), message)
    }

    fn record_mut(&mut self) -> Result<&mut Record, BuildError> {
        let model = self.schema.name.clone();
        self.record
            .as_mut()
            .ok_or_else(|| BuildError::implementation(model, "record has not been loaded"))
    }

    /// Fire handlers for `event`, each at most once
    fn fire(&mut self, event: LifecycleEvent, builder: &mut Builder) -> Result<(), BuildError> {
        let Some(entries) = self.handlers.remove(&event) else {
            return Ok(());
        };

        let lineage = self.child_lineage();
        for entry in entries {
            let record = self.record_mut()?;
            match entry {
                HandlerEntry::Callback(mut handler) => handler(record, builder.store())?,
                HandlerEntry::Related(deferred) => deferred.apply(builder, &lineage, record)?,
            }
            // Earlier events still carry unsaved assignments
            if event.is_post_save() && record.is_persisted() {
                builder.store().refresh(record)?;
            }
        }
        Ok(())
    }

    /// Validate and persist the record, journal it and fire save handlers
    ///
    /// A no-op for `get` nodes.
    ///
    /// # Errors
    ///
    /// [`BuildError::Validation`] when the store rejects the record, or any
    /// error raised by a lifecycle handler.
    pub fn save(&mut self, builder: &mut Builder) -> Result<(), BuildError> {
        if self.action() == Action::Get {
            return Ok(());
        }

        self.fire(LifecycleEvent::PreSave, builder)?;

        let created = self.created;
        let verb = if created { "create" } else { "update" };
        let description = self.to_string();
        let record = self.record_mut()?;
        if let Err(err) = builder.store().validate_and_save(record) {
            tracing::error!("Failed to {verb} {description}: {err}");
            return Err(match err {
                StoreError::ValidationFailed { errors, .. } => {
                    DesignValidationError::new(description, errors).into()
                }
                other => other.into(),
            });
        }

        builder.log_node(self);
        self.created = false;

        let record = self.record_mut()?;
        builder.store().refresh(record)?;
        tracing::info!(
            "{} {}",
            if created { "Created" } else { "Updated" },
            self
        );

        self.fire(LifecycleEvent::PostInstanceSave, builder)?;
        self.fire(LifecycleEvent::PostSave, builder)?;
        Ok(())
    }
}

/// Build a child node for `related`, translating lookup failures
pub(crate) fn child_node(
    builder: &mut Builder,
    lineage: Vec<String>,
    related: &str,
    attributes: &AttributeMap,
    scope: Option<RelationScope>,
    preset: AttributeMap,
) -> Result<ModelNode, BuildError> {
    let schema = builder
        .registry()
        .by_name(related)
        .cloned()
        .ok_or_else(|| BuildError::implementation(related, "related model is not in the catalog"))?;

    let context = NodeContext {
        lineage,
        scope,
        preset,
    };
    ModelNode::build(builder, schema, attributes, context).map_err(|err| match err {
        BuildError::NotFound { model, criteria } => {
            let message = format!("Could not find {model}: {criteria}");
            BuildError::implementation(model, message)
        }
        BuildError::Ambiguous { model, criteria } => {
            let message =
                format!("Expected exactly 1 {model} matching {criteria} but got more than one");
            BuildError::implementation(model, message)
        }
        other => other,
    })
}
