//! Records and record identity

use crate::value::{AttributeMap, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique record identifier (UUID primary key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate new record ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a persisted record: its type name plus primary key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    /// Record type name (e.g. `Site`)
    pub model: String,
    /// Primary key
    pub id: RecordId,
}

impl RecordRef {
    /// Create new reference
    #[inline]
    #[must_use]
    pub fn new(model: impl Into<String>, id: RecordId) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.model, self.id)
    }
}

/// A store record
///
/// `id` is `None` until the record has been saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    model: String,
    id: Option<RecordId>,
    fields: AttributeMap,
    custom_fields: AttributeMap,
}

impl Record {
    /// Create an unsaved, empty record
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            id: None,
            fields: AttributeMap::new(),
            custom_fields: AttributeMap::new(),
        }
    }

    /// With initial fields
    #[must_use]
    pub fn with_fields(mut self, fields: AttributeMap) -> Self {
        self.fields = fields;
        self
    }

    /// Record type name
    #[inline]
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Primary key, if persisted
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<RecordId> {
        self.id
    }

    /// Assign the primary key. Only stores should call this.
    #[inline]
    pub fn assign_id(&mut self, id: RecordId) {
        self.id = Some(id);
    }

    /// Whether the record has been saved
    #[inline]
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Identity of the record, if persisted
    #[must_use]
    pub fn reference(&self) -> Option<RecordRef> {
        self.id.map(|id| RecordRef::new(self.model.clone(), id))
    }

    /// Get field value
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Set field value
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// All fields
    #[inline]
    #[must_use]
    pub fn fields(&self) -> &AttributeMap {
        &self.fields
    }

    /// Mutable fields, for stores applying defaults
    #[inline]
    pub fn fields_mut(&mut self) -> &mut AttributeMap {
        &mut self.fields
    }

    /// Get custom field value
    #[inline]
    #[must_use]
    pub fn custom_field(&self, name: &str) -> Option<&Value> {
        self.custom_fields.get(name)
    }

    /// Set custom field value
    pub fn set_custom_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.custom_fields.insert(name.into(), value.into());
    }

    /// All custom fields
    #[inline]
    #[must_use]
    pub fn custom_fields(&self) -> &AttributeMap {
        &self.custom_fields
    }

    /// Replace contents with a fresh copy from the store
    pub fn replace_from(&mut self, other: &Record) {
        self.fields = other.fields.clone();
        self.custom_fields = other.custom_fields.clone();
        self.id = other.id;
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = ["name", "slug", "model", "username"]
            .iter()
            .find_map(|field| self.fields.get(*field).and_then(Value::as_str));
        match (label, self.id) {
            (Some(label), _) => write!(f, "{label}"),
            (None, Some(id)) => write!(f, "{id}"),
            (None, None) => write!(f, "(unsaved)"),
        }
    }
}
