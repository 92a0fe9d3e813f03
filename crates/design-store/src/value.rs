//! Design values
//!
//! [`Value`] is what designs are made of: the scalars, lists and mappings
//! produced by the rendering layer, plus record references produced while
//! the design is resolved.

use crate::record::RecordRef;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Insertion-ordered mapping from attribute name to value
pub type AttributeMap = IndexMap<String, Value>;

/// A dynamically typed design value
///
/// Deserialization is untagged, so any YAML or JSON document maps onto it.
/// Mappings always deserialize as [`Value::Map`]; [`Value::Record`] only
/// appears once a value has been resolved against the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absent / null value
    #[default]
    Null,

    /// Boolean
    Bool(bool),

    /// Signed integer
    Int(i64),

    /// Floating point number
    Float(f64),

    /// String
    String(String),

    /// Ordered sequence
    List(Vec<Value>),

    /// Nested attribute mapping
    Map(AttributeMap),

    /// Reference to a persisted record
    Record(RecordRef),
}

impl Value {
    /// Short type name used in diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "mapping",
            Self::Record(_) => "record",
        }
    }

    /// Check for [`Value::Null`]
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// True for null, empty strings, empty lists and empty mappings
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::String(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Borrow as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as boolean
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Read as integer
    #[inline]
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow as list
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Borrow as mapping
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&AttributeMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Mutably borrow as mapping
    #[inline]
    pub fn as_map_mut(&mut self) -> Option<&mut AttributeMap> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Borrow as record reference
    #[inline]
    #[must_use]
    pub fn as_record(&self) -> Option<&RecordRef> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Equality used by store lookups
    ///
    /// Integers and floats compare numerically; everything else compares
    /// structurally.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn matches(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                (*a as f64 - *b).abs() < f64::EPSILON
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Record(r) => write!(f, "{r}"),
        }
    }
}

/// Render lookup criteria as `key="value"` pairs
#[must_use]
pub fn render_criteria(criteria: &AttributeMap) -> String {
    criteria
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect::<Vec<_>>()
        .join(",")
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<RecordRef> for Value {
    fn from(value: RecordRef) -> Self {
        Self::Record(value)
    }
}

impl From<AttributeMap> for Value {
    fn from(value: AttributeMap) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_nested_json() {
        let value: Value =
            serde_json::from_str(r#"{"name": "HQ", "asn": 65000, "tags": ["a", "b"], "x": null}"#)
                .unwrap();

        let map = value.as_map().unwrap();
        assert_eq!(map["name"], Value::from("HQ"));
        assert_eq!(map["asn"], Value::Int(65000));
        assert_eq!(map["tags"], Value::from(vec!["a", "b"]));
        assert!(map["x"].is_null());
    }

    #[test]
    fn mapping_order_is_preserved() {
        let value: Value = serde_json::from_str(r#"{"z": 1, "a": 2, "m": 3}"#).unwrap();
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn numeric_match_crosses_int_and_float() {
        assert!(Value::Int(3).matches(&Value::Float(3.0)));
        assert!(!Value::Int(3).matches(&Value::from("3")));
    }

    #[test]
    fn emptiness() {
        assert!(Value::Null.is_empty());
        assert!(Value::from("").is_empty());
        assert!(Value::from(attrs! {}).is_empty());
        assert!(!Value::Int(0).is_empty());
    }

    #[test]
    fn criteria_rendering() {
        let criteria = attrs! { "name" => "HQ", "asn" => 65000 };
        assert_eq!(render_criteria(&criteria), r#"name="HQ",asn="65000""#);
    }
}
