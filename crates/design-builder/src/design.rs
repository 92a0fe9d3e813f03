//! Design documents

use crate::error::LoadError;
use design_store::{AttributeMap, Value};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A design: record-type keys mapped to attribute mappings
///
/// Each value is one attribute mapping or a sequence of them. Keys are the
/// registry's design keys (`sites`, `device_types`).
///
/// Directive keys start with `!`, which YAML reads as a tag, so they must be
/// quoted: `"!get:name": HQ`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Design(AttributeMap);

impl Design {
    /// Create empty design
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Parse YAML text
    ///
    /// # Errors
    ///
    /// [`LoadError::Yaml`] on malformed input.
    pub fn from_yaml_str(text: &str) -> Result<Self, LoadError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Parse JSON text
    ///
    /// # Errors
    ///
    /// [`LoadError::Json`] on malformed input.
    pub fn from_json_str(text: &str) -> Result<Self, LoadError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a `.yaml`, `.yml` or `.json` file
    ///
    /// # Errors
    ///
    /// IO, format or parse failure.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            Some("json") => Self::from_json_str(&text),
            _ => Err(LoadError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Entries in document order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Entry for a key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<AttributeMap> for Design {
    fn from(entries: AttributeMap) -> Self {
        Self(entries)
    }
}
