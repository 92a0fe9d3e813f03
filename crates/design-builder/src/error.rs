//! Error types for the design builder
//!
//! Four families of failure surface from a build:
//! - Design implementation errors (malformed or contradictory designs)
//! - Validation errors (the store refused a record)
//! - Not-found / ambiguous lookups
//! - Extension errors (unknown tags, references, failing hooks)

use crate::directive::Action;
use design_store::{StoreError, ValidationErrors};
use std::fmt;
use std::path::PathBuf;

/// Main build error type
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Design has no entries
    #[error("design is empty")]
    EmptyDesign,

    /// Top-level key does not name a record type, or its value is empty
    #[error("Unknown model key {key} in design")]
    UnknownModelKey {
        /// Offending key
        key: String,
    },

    /// Directive tag is neither an action nor a registered attribute extension
    #[error("Unknown action {tag} on {model}")]
    UnknownAction {
        /// Record type name
        model: String,
        /// Directive tag
        tag: String,
    },

    /// More than one action directive on one node
    #[error("Can perform only one action for {model}, got both {first} and {second}")]
    ConflictingActions {
        /// Record type name
        model: String,
        /// Action already set
        first: Action,
        /// Action requested second
        second: Action,
    },

    /// Double-underscore key whose prefix is not a declared field
    #[error("{field} is not a field on {model}")]
    NotAField {
        /// Record type name
        model: String,
        /// Field name
        field: String,
    },

    /// Attribute extension closure returned a value of an unsupported shape
    #[error("attribute extension {tag} returned an unsupported {found} value")]
    UnsupportedExtensionReturn {
        /// Extension tag
        tag: String,
        /// Type name of the returned value
        found: String,
    },

    /// Update action found nothing to update
    #[error("No match for {model} with {criteria}")]
    NoMatchForUpdate {
        /// Record type name
        model: String,
        /// Rendered criteria
        criteria: String,
    },

    /// Relationship nesting deeper than the configured bound
    #[error("design nesting exceeds {max} levels: {path}")]
    DepthExceeded {
        /// Configured bound
        max: usize,
        /// Lineage of record types, outermost first
        path: String,
    },

    /// Any other malformed design
    #[error("{message} ({model})")]
    Implementation {
        /// Record type name
        model: String,
        /// What was wrong
        message: String,
    },

    /// Lookup matched nothing
    #[error("Could not find {model}: {criteria}")]
    NotFound {
        /// Record type name
        model: String,
        /// Rendered criteria
        criteria: String,
    },

    /// Lookup matched more than one record
    #[error("Expected exactly 1 {model} matching {criteria} but got more than one")]
    Ambiguous {
        /// Record type name
        model: String,
        /// Rendered criteria
        criteria: String,
    },

    /// Store refused to save a record
    #[error(transparent)]
    Validation(#[from] DesignValidationError),

    /// No value extension for the tag of a `!tag:arg` string
    #[error("Unknown value extension {0}")]
    UnknownValueExtension(String),

    /// Reference name was never registered
    #[error("no reference named {0}")]
    UnknownReference(String),

    /// Referenced record has not been saved yet
    #[error("reference {0} has not been saved")]
    UnresolvedReference(String),

    /// One or more commit/roll-back hooks failed
    #[error(transparent)]
    Hooks(#[from] HookFailures),

    /// Store call failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BuildError {
    /// Create implementation error
    #[must_use]
    pub fn implementation(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Implementation {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Malformed or contradictory design
    #[must_use]
    pub fn is_implementation_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyDesign
                | Self::UnknownModelKey { .. }
                | Self::UnknownAction { .. }
                | Self::ConflictingActions { .. }
                | Self::NotAField { .. }
                | Self::UnsupportedExtensionReturn { .. }
                | Self::NoMatchForUpdate { .. }
                | Self::DepthExceeded { .. }
                | Self::Implementation { .. }
        )
    }

    /// Store validation failure
    #[inline]
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Lookup found zero or many records
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Ambiguous { .. })
    }

    /// Unknown extension, unknown or unresolved reference
    #[inline]
    #[must_use]
    pub fn is_extension_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownValueExtension(_) | Self::UnknownReference(_) | Self::UnresolvedReference(_)
        )
    }
}

/// Validation failure for one node
///
/// Renders `"{node} failed validation"` followed by the store's messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesignValidationError {
    /// Description of the node, e.g. `Site HQ`
    pub node: String,
    /// Messages reported by the store
    pub errors: ValidationErrors,
}

impl DesignValidationError {
    /// Create new validation error
    #[must_use]
    pub fn new(node: impl Into<String>, errors: ValidationErrors) -> Self {
        Self {
            node: node.into(),
            errors,
        }
    }
}

impl fmt::Display for DesignValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed validation", self.node)?;
        if !self.errors.is_empty() {
            write!(f, "\n\n{}", self.errors)?;
        }
        Ok(())
    }
}

impl std::error::Error for DesignValidationError {}

/// Error returned by an extension hook
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// Plain failure message
    #[error("{0}")]
    Failed(String),

    /// Store call inside the hook failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Any other error
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ExtensionError {
    /// Create failure from message
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Hook phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// `commit()` hooks
    Commit,
    /// `roll_back()` hooks
    RollBack,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::RollBack => write!(f, "roll back"),
        }
    }
}

/// Aggregate of failing extension hooks
///
/// Every hook runs; failures are collected in registration order.
#[derive(Debug)]
pub struct HookFailures {
    /// Which hook ran
    pub phase: HookPhase,
    /// `(tag, error)` per failing extension
    pub failures: Vec<(String, ExtensionError)>,
}

impl HookFailures {
    /// Empty aggregate for a phase
    #[must_use]
    pub fn new(phase: HookPhase) -> Self {
        Self {
            phase,
            failures: Vec::new(),
        }
    }

    /// Record a failure
    pub fn push(&mut self, tag: impl Into<String>, error: ExtensionError) {
        self.failures.push((tag.into(), error));
    }

    /// No hook failed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Tags of failing extensions
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|(tag, _)| tag.as_str())
    }

    /// `Ok` when nothing failed
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one hook failed.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for HookFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for", self.phase)?;
        for (i, (tag, error)) in self.failures.iter().enumerate() {
            let sep = if i == 0 { " " } else { "; " };
            write!(f, "{sep}{tag}: {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for HookFailures {}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Two extensions claim the same tag for the same capability
    #[error("duplicate {kind} extension tag: {tag}")]
    DuplicateExtension {
        /// Capability kind
        kind: String,
        /// Tag
        tag: String,
    },

    /// Invalid setting
    #[error("invalid setting: {0}")]
    Invalid(String),

    /// Loading failed
    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Errors reading configuration or designs from text or files
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// YAML parse failure
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parse failure
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse failure
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// File extension not recognized
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(PathBuf),
}
