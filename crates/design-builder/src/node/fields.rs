//! Field application and deferred relationships

use super::{child_node, ModelNode};
use crate::builder::Builder;
use crate::directive::Action;
use crate::error::{BuildError, DesignValidationError};
use design_store::{
    AttributeMap, CustomRelationship, FieldKind, Record, RecordRef, RelationScope, StoreError,
    Value,
};

/// Relationship work that needs the owner's primary key
pub(super) enum Deferred {
    /// Foreign key marked `deferred: true`; assigned then the owner re-saved
    ForeignKey {
        field: String,
        related: String,
        attributes: AttributeMap,
    },
    /// One item of a reverse foreign key
    Reverse {
        field: String,
        related: String,
        remote_field: String,
        item: Value,
    },
    /// One item of a many-to-many field
    ManyToMany {
        field: String,
        related: String,
        item: Value,
    },
    /// One item of a custom relationship
    Custom {
        relationship: CustomRelationship,
        item: Value,
    },
}

impl ModelNode {
    /// Apply field assignments and custom fields to the backing record
    pub(super) fn update_fields(&mut self, builder: &mut Builder) -> Result<(), BuildError> {
        if self.action() == Action::Get {
            if !self.attributes.is_empty() || !self.custom_fields.is_empty() {
                return Err(
                    self.implementation_error("Cannot update fields when using the GET action")
                );
            }
            return Ok(());
        }

        let preset = std::mem::take(&mut self.preset);
        let record = self.record_mut()?;
        for (field, value) in preset {
            record.set(field, value);
        }

        let attributes = std::mem::take(&mut self.attributes);
        for (name, value) in attributes {
            let kind = self.schema.get_field(&name).map(|field| field.kind.clone());
            match kind {
                Some(FieldKind::ForeignKey { related, .. }) => {
                    self.assign_foreign_key(builder, name, related, value)?;
                }
                Some(FieldKind::Reverse {
                    related,
                    remote_field,
                }) => {
                    for item in items(value) {
                        self.defer(Deferred::Reverse {
                            field: name.clone(),
                            related: related.clone(),
                            remote_field: remote_field.clone(),
                            item,
                        });
                    }
                }
                Some(FieldKind::ManyToMany { related }) => {
                    for item in items(value) {
                        self.defer(Deferred::ManyToMany {
                            field: name.clone(),
                            related: related.clone(),
                            item,
                        });
                    }
                }
                Some(FieldKind::Attribute { .. }) => self.record_mut()?.set(name, value),
                None => match self.custom_relationship(&name).cloned() {
                    Some(relationship) => {
                        for item in items(value) {
                            self.defer(Deferred::Custom {
                                relationship: relationship.clone(),
                                item,
                            });
                        }
                    }
                    None => self.record_mut()?.set(name, value),
                },
            }
        }

        let custom_fields = self.custom_fields.clone();
        let record = self.record_mut()?;
        for (name, value) in custom_fields {
            record.set_custom_field(name, value);
        }
        Ok(())
    }

    fn assign_foreign_key(
        &mut self,
        builder: &mut Builder,
        field: String,
        related: String,
        value: Value,
    ) -> Result<(), BuildError> {
        match value {
            Value::Map(attributes) => {
                if is_deferred(builder, &related, &attributes) {
                    self.defer(Deferred::ForeignKey {
                        field,
                        related,
                        attributes,
                    });
                    return Ok(());
                }
                let reference = save_child(
                    builder,
                    self.child_lineage(),
                    &related,
                    &attributes,
                    None,
                    AttributeMap::new(),
                )?;
                self.record_mut()?.set(field, reference);
            }
            value @ (Value::Record(_) | Value::Null) => self.record_mut()?.set(field, value),
            other => {
                return Err(self.implementation_error(format!(
                    "Expecting input field '{field}' to be a mapping or reference, got {}: {other}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }
}

impl Deferred {
    /// Carry out the relationship work for a freshly saved owner
    pub(super) fn apply(
        self,
        builder: &mut Builder,
        lineage: &[String],
        owner: &mut Record,
    ) -> Result<(), BuildError> {
        let owner_ref = owner.reference().ok_or_else(|| {
            BuildError::implementation(owner.model(), "relationship requires a saved record")
        })?;

        match self {
            Self::ForeignKey {
                field,
                related,
                attributes,
            } => {
                let reference = save_child(
                    builder,
                    lineage.to_vec(),
                    &related,
                    &attributes,
                    None,
                    AttributeMap::new(),
                )?;
                owner.set(field, reference);
                validated_save(builder, owner)
            }
            Self::Reverse {
                field,
                related,
                remote_field,
                item,
            } => match item {
                Value::Map(attributes) => {
                    let mut preset = AttributeMap::new();
                    preset.insert(remote_field.clone(), Value::Record(owner_ref.clone()));
                    let scope = RelationScope::new(owner_ref.clone(), field);
                    let mut child =
                        child_node(builder, lineage.to_vec(), &related, &attributes, Some(scope), preset)?;
                    if child.action() == Action::Get {
                        let record = child.record_mut()?;
                        record.set(remote_field, Value::Record(owner_ref));
                        validated_save(builder, record)
                    } else {
                        child.save(builder)
                    }
                }
                Value::Record(reference) => {
                    let mut record = builder.store().fetch(&reference)?;
                    record.set(remote_field, Value::Record(owner_ref));
                    validated_save(builder, &mut record)
                }
                other => Err(BuildError::implementation(
                    related,
                    format!(
                        "{field} items must be mappings or references, got {}",
                        other.type_name()
                    ),
                )),
            },
            Self::ManyToMany {
                field,
                related,
                item,
            } => {
                let item_ref = item_reference(builder, lineage, &field, &related, item)?;
                builder.store().add_related(&owner_ref, &field, &item_ref)?;
                Ok(())
            }
            Self::Custom { relationship, item } => {
                let peer = relationship.peer_of(&owner_ref.model).to_string();
                let item_ref = item_reference(builder, lineage, &relationship.slug, &peer, item)?;
                let (source, destination) = if relationship.source == owner_ref.model {
                    (owner_ref, item_ref)
                } else {
                    (item_ref, owner_ref)
                };
                builder
                    .store()
                    .associate(&relationship.slug, &source, &destination)?;
                Ok(())
            }
        }
    }
}

/// Reference for a to-many item, building and saving a child for mappings
fn item_reference(
    builder: &mut Builder,
    lineage: &[String],
    field: &str,
    related: &str,
    item: Value,
) -> Result<RecordRef, BuildError> {
    match item {
        Value::Map(attributes) => save_child(
            builder,
            lineage.to_vec(),
            related,
            &attributes,
            None,
            AttributeMap::new(),
        ),
        Value::Record(reference) => Ok(reference),
        other => Err(BuildError::implementation(
            related,
            format!(
                "{field} items must be mappings or references, got {}",
                other.type_name()
            ),
        )),
    }
}

/// Build a child, save it unless it is a `get`, and return its reference
fn save_child(
    builder: &mut Builder,
    lineage: Vec<String>,
    related: &str,
    attributes: &AttributeMap,
    scope: Option<RelationScope>,
    preset: AttributeMap,
) -> Result<RecordRef, BuildError> {
    let mut child = child_node(builder, lineage, related, attributes, scope, preset)?;
    if child.action() != Action::Get {
        child.save(builder)?;
    }
    child
        .reference()
        .ok_or_else(|| BuildError::implementation(related, "related record was not saved"))
}

/// Re-save a record outside of a node's own save
fn validated_save(builder: &Builder, record: &mut Record) -> Result<(), BuildError> {
    builder
        .store()
        .validate_and_save(record)
        .map_err(|err| match err {
            StoreError::ValidationFailed { model, errors } => {
                DesignValidationError::new(format!("{model} {record}"), errors).into()
            }
            other => other.into(),
        })
}

/// A foreign key mapping carrying `deferred: true`
fn is_deferred(builder: &Builder, related: &str, attributes: &AttributeMap) -> bool {
    let declares_field = builder
        .registry()
        .by_name(related)
        .is_some_and(|schema| schema.has_field("deferred"));
    !declares_field && attributes.get("deferred").and_then(Value::as_bool) == Some(true)
}

/// Items of a to-many assignment
fn items(value: Value) -> Vec<Value> {
    match value {
        Value::List(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}
