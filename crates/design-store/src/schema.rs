//! Schema reflection
//!
//! [`ModelSchema`] describes one record type the way the engine needs to see
//! it: which names are fields, and which of those are relationships to other
//! types.

use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar type accepted by an attribute field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ValueType {
    /// Any value
    #[default]
    Any,
    /// String value
    String,
    /// Integer value
    Int,
    /// Float value (integers accepted)
    Float,
    /// Boolean value
    Bool,
}

impl ValueType {
    /// Whether `value` is acceptable for this type (null always is)
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null)
            | (Self::Any, _)
            | (Self::String, Value::String(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_) | Value::Int(_))
            | (Self::Bool, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        };
        write!(f, "{name}")
    }
}

/// Field classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain scalar column
    Attribute {
        /// Accepted value type
        value_type: ValueType,
        /// Must be non-empty on save
        required: bool,
        /// Must be unique across the table
        unique: bool,
        /// Store-side default applied on save when absent
        default: Option<Value>,
    },

    /// To-one relationship owned by this record
    ForeignKey {
        /// Related type name
        related: String,
        /// Must be set on save
        required: bool,
    },

    /// To-many relationship owned by the related type (reverse foreign key)
    Reverse {
        /// Related type name
        related: String,
        /// Foreign key field on the related type pointing back here
        remote_field: String,
    },

    /// Many-to-many relationship
    ManyToMany {
        /// Related type name
        related: String,
    },
}

/// Description of one field on a record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name
    pub name: String,
    /// Field kind
    pub kind: FieldKind,
}

impl FieldDescriptor {
    /// Scalar attribute field
    #[must_use]
    pub fn attribute(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Attribute {
                value_type,
                required: false,
                unique: false,
                default: None,
            },
        }
    }

    /// Foreign key to `related`
    #[must_use]
    pub fn foreign_key(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::ForeignKey {
                related: related.into(),
                required: false,
            },
        }
    }

    /// Reverse side of `related.remote_field`
    #[must_use]
    pub fn reverse(
        name: impl Into<String>,
        related: impl Into<String>,
        remote_field: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Reverse {
                related: related.into(),
                remote_field: remote_field.into(),
            },
        }
    }

    /// Many-to-many link to `related`
    #[must_use]
    pub fn many_to_many(name: impl Into<String>, related: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::ManyToMany {
                related: related.into(),
            },
        }
    }

    /// Mark required (attributes and foreign keys)
    #[must_use]
    pub fn required(mut self) -> Self {
        match &mut self.kind {
            FieldKind::Attribute { required, .. } | FieldKind::ForeignKey { required, .. } => {
                *required = true;
            }
            FieldKind::Reverse { .. } | FieldKind::ManyToMany { .. } => {}
        }
        self
    }

    /// Mark unique (attributes only)
    #[must_use]
    pub fn unique(mut self) -> Self {
        if let FieldKind::Attribute { unique, .. } = &mut self.kind {
            *unique = true;
        }
        self
    }

    /// Store-side default (attributes only)
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        if let FieldKind::Attribute { default, .. } = &mut self.kind {
            *default = Some(value.into());
        }
        self
    }

    /// Related type name for relationship fields
    #[must_use]
    pub fn related_model(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Attribute { .. } => None,
            FieldKind::ForeignKey { related, .. }
            | FieldKind::Reverse { related, .. }
            | FieldKind::ManyToMany { related } => Some(related),
        }
    }

    /// Whether this is any kind of relationship
    #[inline]
    #[must_use]
    pub fn is_relation(&self) -> bool {
        self.related_model().is_some()
    }
}

/// Reflected description of a record type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSchema {
    /// Application label (e.g. `dcim`)
    pub app_label: String,
    /// Type name (e.g. `Site`)
    pub name: String,
    /// Human readable plural (e.g. `sites`, `device types`)
    pub verbose_name_plural: String,
    fields: IndexMap<String, FieldDescriptor>,
    constructor_args: IndexSet<String>,
}

impl ModelSchema {
    /// Create schema with no fields
    #[must_use]
    pub fn new(
        app_label: impl Into<String>,
        name: impl Into<String>,
        verbose_name_plural: impl Into<String>,
    ) -> Self {
        Self {
            app_label: app_label.into(),
            name: name.into(),
            verbose_name_plural: verbose_name_plural.into(),
            fields: IndexMap::new(),
            constructor_args: IndexSet::new(),
        }
    }

    /// Add field
    #[must_use]
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Accept a constructor argument that is not a declared field
    #[must_use]
    pub fn constructor_arg(mut self, name: impl Into<String>) -> Self {
        self.constructor_args.insert(name.into());
        self
    }

    /// Lower-cased `app_label.name`, e.g. `dcim.site`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}.{}", self.app_label, self.name).to_lowercase()
    }

    /// Design key for this type: the verbose plural as a variable name
    ///
    /// `"device types"` becomes `device_types`.
    #[must_use]
    pub fn plural_key(&self) -> String {
        self.verbose_name_plural
            .trim()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect()
    }

    /// Look up a field by name
    #[inline]
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.get(name)
    }

    /// Whether `name` is a declared field
    #[inline]
    #[must_use]
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.values()
    }

    /// Whether `name` is an accepted constructor argument
    #[inline]
    #[must_use]
    pub fn accepts_constructor_arg(&self, name: &str) -> bool {
        self.constructor_args.contains(name)
    }
}

/// Cardinality of a [`CustomRelationship`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    /// Each source and each destination appear in at most one association
    OneToOne,
    /// A destination has at most one source
    #[default]
    OneToMany,
    /// Unrestricted
    ManyToMany,
}

/// User-defined link between two record types
///
/// Custom relationships are not schema fields. The store manages them as
/// association rows, and a design addresses them by `slug` on either side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRelationship {
    /// Design key on both sides
    pub slug: String,
    /// Source type name
    pub source: String,
    /// Destination type name
    pub destination: String,
    /// Cardinality
    pub kind: RelationshipKind,
}

impl CustomRelationship {
    /// Create relationship from `source` to `destination`
    #[must_use]
    pub fn new(
        slug: impl Into<String>,
        source: impl Into<String>,
        destination: impl Into<String>,
        kind: RelationshipKind,
    ) -> Self {
        Self {
            slug: slug.into(),
            source: source.into(),
            destination: destination.into(),
            kind,
        }
    }

    /// Whether `model` is either end
    #[must_use]
    pub fn involves(&self, model: &str) -> bool {
        self.source == model || self.destination == model
    }

    /// Type on the far side when seen from `model`
    #[must_use]
    pub fn peer_of(&self, model: &str) -> &str {
        if self.source == model {
            &self.destination
        } else {
            &self.source
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plural_key_is_variable_name() {
        let schema = ModelSchema::new("dcim", "DeviceType", "device types");
        assert_eq!(schema.plural_key(), "device_types");

        let schema = ModelSchema::new("ipam", "IPAddress", "IP addresses");
        assert_eq!(schema.plural_key(), "ip_addresses");
    }

    #[test]
    fn label_is_lower_cased() {
        let schema = ModelSchema::new("dcim", "DeviceType", "device types");
        assert_eq!(schema.label(), "dcim.devicetype");
    }

    #[test]
    fn modifiers_only_touch_applicable_kinds() {
        let fk = FieldDescriptor::foreign_key("site", "Site").required().unique();
        assert_eq!(
            fk.kind,
            FieldKind::ForeignKey {
                related: "Site".into(),
                required: true
            }
        );

        let m2m = FieldDescriptor::many_to_many("tags", "Tag").required();
        assert_eq!(m2m.related_model(), Some("Tag"));
    }

    #[test]
    fn custom_relationship_peer_depends_on_side() {
        let rel = CustomRelationship::new("site-vlans", "Site", "Vlan", RelationshipKind::OneToMany);
        assert_eq!(rel.peer_of("Site"), "Vlan");
        assert_eq!(rel.peer_of("Vlan"), "Site");
        assert!(rel.involves("Vlan"));
        assert!(!rel.involves("Region"));
    }

    #[test]
    fn value_type_acceptance() {
        assert!(ValueType::Float.accepts(&Value::Int(1)));
        assert!(!ValueType::Int.accepts(&Value::Float(1.0)));
        assert!(ValueType::String.accepts(&Value::Null));
        assert!(!ValueType::Bool.accepts(&Value::from("true")));
    }
}
