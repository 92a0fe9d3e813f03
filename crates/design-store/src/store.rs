//! Store capability interface
//!
//! The engine never talks to a database directly. Everything it needs from
//! the persistence layer goes through [`Store`]: reflection, lookup,
//! construction, validate-and-save, refresh, many-to-many linking and custom
//! relationship associations.

use crate::record::{Record, RecordId, RecordRef};
use crate::schema::{CustomRelationship, ModelSchema};
use crate::value::{render_criteria, AttributeMap};
use std::collections::BTreeMap;
use std::fmt;

/// Relationship cursor a lookup is scoped to
///
/// Scoped lookups only consider records related to `owner` through `field`
/// (a reverse or many-to-many field on the owner's type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationScope {
    /// Owning record
    pub owner: RecordRef,
    /// Relationship field on the owner's type
    pub field: String,
}

impl RelationScope {
    /// Create new scope
    #[must_use]
    pub fn new(owner: RecordRef, field: impl Into<String>) -> Self {
        Self {
            owner,
            field: field.into(),
        }
    }
}

/// Lookup request
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Record type name
    pub model: String,
    /// Equality criteria; `a__b` keys traverse foreign keys
    pub criteria: AttributeMap,
    /// Optional relationship cursor
    pub scope: Option<RelationScope>,
}

impl Query {
    /// Unscoped query
    #[must_use]
    pub fn new(model: impl Into<String>, criteria: AttributeMap) -> Self {
        Self {
            model: model.into(),
            criteria,
            scope: None,
        }
    }

    /// Restrict to a relationship cursor
    #[must_use]
    pub fn within(mut self, scope: Option<RelationScope>) -> Self {
        self.scope = scope;
        self
    }
}

/// Validation messages for one record
///
/// Rendered as the general messages followed by one `**field:** messages`
/// block per field, sorted by field name, blocks separated by blank lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    /// Messages not tied to a field
    pub general: Vec<String>,
    /// Per-field messages
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Empty error set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a general message
    pub fn add_general(&mut self, message: impl Into<String>) {
        self.general.push(message.into());
    }

    /// Add a message for `field`
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.fields
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// No messages recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.general.is_empty() && self.fields.is_empty()
    }

    /// Convert to `Err` when any message was recorded
    ///
    /// # Errors
    ///
    /// Returns `self` if not empty.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut blocks: Vec<String> = self.general.clone();
        blocks.extend(
            self.fields
                .iter()
                .map(|(field, messages)| format!("**{field}:** {}", messages.join(", "))),
        );
        write!(f, "{}", blocks.join("\n\n"))
    }
}

/// Store errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Lookup matched nothing
    #[error("no {model} matching query {criteria}")]
    NotFound {
        /// Record type name
        model: String,
        /// Rendered criteria
        criteria: String,
    },

    /// Lookup matched more than one record
    #[error("{count} {model} records match query {criteria}")]
    MultipleFound {
        /// Record type name
        model: String,
        /// Rendered criteria
        criteria: String,
        /// Number of matches
        count: usize,
    },

    /// Type is not in the catalog
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Field is not declared on the type
    #[error("{model} has no field named {field}")]
    UnknownField {
        /// Record type name
        model: String,
        /// Field name
        field: String,
    },

    /// Construction arguments rejected
    #[error("invalid arguments for {model}: {message}")]
    InvalidArguments {
        /// Record type name
        model: String,
        /// What was wrong
        message: String,
    },

    /// Record failed validation
    #[error("{model} failed validation: {errors}")]
    ValidationFailed {
        /// Record type name
        model: String,
        /// Collected messages
        errors: ValidationErrors,
    },

    /// Operation needs a saved record
    #[error("{0} record has not been saved")]
    NotPersisted(String),

    /// Custom relationship slug is not defined
    #[error("unknown relationship: {0}")]
    UnknownRelationship(String),

    /// Referenced record no longer exists
    #[error("record {model}:{id} does not exist")]
    RecordMissing {
        /// Record type name
        model: String,
        /// Primary key
        id: RecordId,
    },
}

impl StoreError {
    /// Create not-found error for a query
    #[must_use]
    pub fn not_found(query: &Query) -> Self {
        Self::NotFound {
            model: query.model.clone(),
            criteria: render_criteria(&query.criteria),
        }
    }

    /// Create multiple-found error for a query
    #[must_use]
    pub fn multiple_found(query: &Query, count: usize) -> Self {
        Self::MultipleFound {
            model: query.model.clone(),
            criteria: render_criteria(&query.criteria),
            count,
        }
    }

    /// Create invalid-arguments error
    #[must_use]
    pub fn invalid_arguments(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Lookup found nothing
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Lookup was ambiguous
    #[inline]
    #[must_use]
    pub fn is_multiple_found(&self) -> bool {
        matches!(self, Self::MultipleFound { .. })
    }
}

/// Persistent object store capability
///
/// Implementations are blocking. The engine issues calls depth first from a
/// single thread.
pub trait Store: Send + Sync {
    /// Every record type the store knows about
    fn catalog(&self) -> Vec<ModelSchema>;

    /// Find exactly one record
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] for zero matches and
    /// [`StoreError::MultipleFound`] for more than one.
    fn lookup(&self, query: &Query) -> Result<Record, StoreError>;

    /// Construct a new, unsaved record from keyword arguments
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArguments`] when an argument is not accepted.
    fn construct(&self, model: &str, kwargs: &AttributeMap) -> Result<Record, StoreError>;

    /// Validate and persist; assigns the primary key on first save
    ///
    /// # Errors
    ///
    /// [`StoreError::ValidationFailed`] carrying the per-field messages.
    fn validate_and_save(&self, record: &mut Record) -> Result<(), StoreError>;

    /// Reload a persisted record in place
    ///
    /// # Errors
    ///
    /// Fails if the record is unsaved or no longer exists.
    fn refresh(&self, record: &mut Record) -> Result<(), StoreError>;

    /// Load a record by identity
    ///
    /// # Errors
    ///
    /// [`StoreError::RecordMissing`] if no such record exists.
    fn fetch(&self, reference: &RecordRef) -> Result<Record, StoreError>;

    /// Link `item` to `owner` through a many-to-many `field`
    ///
    /// # Errors
    ///
    /// Fails if `field` is not a many-to-many field or either side is missing.
    fn add_related(
        &self,
        owner: &RecordRef,
        field: &str,
        item: &RecordRef,
    ) -> Result<(), StoreError>;

    /// Custom relationships with `model` at either end
    fn relationships(&self, model: &str) -> Vec<CustomRelationship>;

    /// Associate `source` with `destination` through a custom relationship
    ///
    /// Associating an already associated pair is a no-op.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownRelationship`] for an undefined slug, or an
    /// argument error when the pair has the wrong types or would break the
    /// relationship's cardinality.
    fn associate(
        &self,
        relationship: &str,
        source: &RecordRef,
        destination: &RecordRef,
    ) -> Result<(), StoreError>;
}
