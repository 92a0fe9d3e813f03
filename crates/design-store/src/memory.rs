//! In-memory store
//!
//! A [`Store`] backed by ordered in-memory tables. It enforces enough of a
//! relational store's behavior (typed construction, required and unique
//! checks, foreign key integrity, relationship scoped lookups) for the
//! engine to be exercised end to end without a database.

use crate::record::{Record, RecordId, RecordRef};
use crate::schema::{CustomRelationship, FieldKind, ModelSchema, RelationshipKind};
use crate::store::{Query, RelationScope, Store, StoreError, ValidationErrors};
use crate::value::{AttributeMap, Value};
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

/// Many-to-many link row
#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    owner: RecordRef,
    field: String,
    item: RecordRef,
}

/// Custom relationship association row
#[derive(Debug, Clone, PartialEq, Eq)]
struct Association {
    relationship: String,
    source: RecordRef,
    destination: RecordRef,
}

#[derive(Debug, Default)]
struct Tables {
    rows: IndexMap<String, IndexMap<RecordId, Record>>,
    links: Vec<Link>,
    associations: Vec<Association>,
    mutations: u64,
}

impl Tables {
    fn get(&self, reference: &RecordRef) -> Option<&Record> {
        self.rows
            .get(&reference.model)
            .and_then(|table| table.get(&reference.id))
    }
}

/// In-memory [`Store`] implementation
#[derive(Debug)]
pub struct MemoryStore {
    catalog: IndexMap<String, ModelSchema>,
    relationships: IndexMap<String, CustomRelationship>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store for the given catalog
    #[must_use]
    pub fn new(catalog: impl IntoIterator<Item = ModelSchema>) -> Self {
        let catalog: IndexMap<String, ModelSchema> = catalog
            .into_iter()
            .map(|schema| (schema.name.clone(), schema))
            .collect();
        let rows = catalog
            .keys()
            .map(|name| (name.clone(), IndexMap::new()))
            .collect();

        Self {
            catalog,
            relationships: IndexMap::new(),
            tables: RwLock::new(Tables {
                rows,
                ..Tables::default()
            }),
        }
    }

    /// Define a custom relationship
    #[must_use]
    pub fn with_relationship(mut self, relationship: CustomRelationship) -> Self {
        self.relationships
            .insert(relationship.slug.clone(), relationship);
        self
    }

    /// Schema for a type name
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownModel`] if the type is not in the catalog.
    pub fn schema(&self, model: &str) -> Result<&ModelSchema, StoreError> {
        self.catalog
            .get(model)
            .ok_or_else(|| StoreError::UnknownModel(model.to_string()))
    }

    /// Construct, validate and save a record in one step
    ///
    /// # Errors
    ///
    /// Any construction or validation error.
    pub fn seed(&self, model: &str, fields: AttributeMap) -> Result<RecordRef, StoreError> {
        let mut record = self.construct(model, &fields)?;
        self.validate_and_save(&mut record)?;
        record
            .reference()
            .ok_or_else(|| StoreError::NotPersisted(model.to_string()))
    }

    /// Number of saved records of a type
    #[must_use]
    pub fn count(&self, model: &str) -> usize {
        self.tables.read().rows.get(model).map_or(0, IndexMap::len)
    }

    /// All saved records of a type, in insertion order
    #[must_use]
    pub fn all(&self, model: &str) -> Vec<Record> {
        self.tables
            .read()
            .rows
            .get(model)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Saved records of a type matching every criterion
    ///
    /// # Errors
    ///
    /// Fails on unknown types or fields.
    pub fn find(&self, model: &str, criteria: &AttributeMap) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read();
        self.matching(&tables, &Query::new(model, criteria.clone()))
    }

    /// Records related to `owner` through a reverse or many-to-many field
    ///
    /// # Errors
    ///
    /// Fails if `field` is not a relationship on the owner's type.
    pub fn related(&self, owner: &RecordRef, field: &str) -> Result<Vec<Record>, StoreError> {
        let scope = RelationScope::new(owner.clone(), field);
        let related = self.scope_target(&scope)?;
        let tables = self.tables.read();
        self.matching(&tables, &Query::new(related, AttributeMap::new()).within(Some(scope)))
    }

    /// `(source, destination)` pairs associated through a custom relationship
    #[must_use]
    pub fn associations(&self, relationship: &str) -> Vec<(RecordRef, RecordRef)> {
        self.tables
            .read()
            .associations
            .iter()
            .filter(|row| row.relationship == relationship)
            .map(|row| (row.source.clone(), row.destination.clone()))
            .collect()
    }

    /// Number of saves and links performed so far
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.tables.read().mutations
    }

    fn scope_target(&self, scope: &RelationScope) -> Result<String, StoreError> {
        let schema = self.schema(&scope.owner.model)?;
        schema
            .get_field(&scope.field)
            .and_then(|field| field.related_model())
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnknownField {
                model: schema.name.clone(),
                field: scope.field.clone(),
            })
    }

    fn matching(&self, tables: &Tables, query: &Query) -> Result<Vec<Record>, StoreError> {
        let schema = self.schema(&query.model)?;
        let Some(table) = tables.rows.get(&query.model) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        for record in table.values() {
            if let Some(scope) = &query.scope {
                if !self.in_scope(tables, scope, record)? {
                    continue;
                }
            }

            let mut matched = true;
            for (key, expected) in &query.criteria {
                if !self.field_matches(tables, schema, record, key, expected)? {
                    matched = false;
                    break;
                }
            }
            if matched {
                found.push(record.clone());
            }
        }
        Ok(found)
    }

    fn in_scope(
        &self,
        tables: &Tables,
        scope: &RelationScope,
        record: &Record,
    ) -> Result<bool, StoreError> {
        let owner_schema = self.schema(&scope.owner.model)?;
        let unknown = || StoreError::UnknownField {
            model: owner_schema.name.clone(),
            field: scope.field.clone(),
        };
        let field = owner_schema.get_field(&scope.field).ok_or_else(unknown)?;
        let Some(reference) = record.reference() else {
            return Ok(false);
        };

        Ok(match &field.kind {
            FieldKind::Reverse { remote_field, .. } => {
                record.get(remote_field).and_then(Value::as_record) == Some(&scope.owner)
            }
            FieldKind::ManyToMany { .. } => tables.links.iter().any(|link| {
                link.owner == scope.owner && link.field == scope.field && link.item == reference
            }),
            FieldKind::ForeignKey { .. } => tables
                .get(&scope.owner)
                .and_then(|owner| owner.get(&scope.field))
                .and_then(Value::as_record)
                == Some(&reference),
            FieldKind::Attribute { .. } => return Err(unknown()),
        })
    }

    fn field_matches(
        &self,
        tables: &Tables,
        schema: &ModelSchema,
        record: &Record,
        key: &str,
        expected: &Value,
    ) -> Result<bool, StoreError> {
        let (name, rest) = match key.split_once("__") {
            Some((name, rest)) => (name, Some(rest)),
            None => (key, None),
        };

        if name == "id" && rest.is_none() {
            return Ok(record
                .id()
                .is_some_and(|id| expected.as_str() == Some(id.to_string().as_str())));
        }

        let field = schema
            .get_field(name)
            .ok_or_else(|| StoreError::UnknownField {
                model: schema.name.clone(),
                field: name.to_string(),
            })?;

        let actual = record.get(name).unwrap_or(&Value::Null);
        match (rest, &field.kind) {
            (None, _) => Ok(actual.matches(expected)),
            (Some(rest), FieldKind::ForeignKey { related, .. }) => {
                let Some(target) = actual.as_record().and_then(|r| tables.get(r)) else {
                    return Ok(false);
                };
                let related_schema = self.schema(related)?;
                self.field_matches(tables, related_schema, target, rest, expected)
            }
            (Some(_), _) => Err(StoreError::UnknownField {
                model: schema.name.clone(),
                field: key.to_string(),
            }),
        }
    }

    fn check_fields(&self, tables: &Tables, schema: &ModelSchema, record: &Record) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        for field in schema.fields() {
            let value = record.get(&field.name).unwrap_or(&Value::Null);
            match &field.kind {
                FieldKind::Attribute {
                    value_type,
                    required,
                    unique,
                    ..
                } => {
                    if *required && value.is_empty() {
                        errors.add(&field.name, "This field cannot be blank.");
                        continue;
                    }
                    if !value_type.accepts(value) {
                        errors.add(
                            &field.name,
                            format!("Expected a {value_type} value, got {}.", value.type_name()),
                        );
                        continue;
                    }
                    if *unique && !value.is_null() {
                        let clash = tables.rows.get(&schema.name).is_some_and(|table| {
                            table.values().any(|other| {
                                other.id() != record.id()
                                    && other.get(&field.name).is_some_and(|v| v.matches(value))
                            })
                        });
                        if clash {
                            errors.add(
                                &field.name,
                                format!("{} with this {} already exists.", schema.name, field.name),
                            );
                        }
                    }
                }
                FieldKind::ForeignKey { related, required } => match value {
                    Value::Null => {
                        if *required {
                            errors.add(&field.name, "This field cannot be null.");
                        }
                    }
                    Value::Record(target) if &target.model == related => {
                        if tables.get(target).is_none() {
                            errors.add(
                                &field.name,
                                format!("{related} instance with id {} does not exist.", target.id),
                            );
                        }
                    }
                    other => errors.add(
                        &field.name,
                        format!("Expected a {related} reference, got {}.", other.type_name()),
                    ),
                },
                FieldKind::Reverse { .. } | FieldKind::ManyToMany { .. } => {}
            }
        }

        errors
    }
}

impl Store for MemoryStore {
    fn catalog(&self) -> Vec<ModelSchema> {
        self.catalog.values().cloned().collect()
    }

    fn lookup(&self, query: &Query) -> Result<Record, StoreError> {
        let tables = self.tables.read();
        let mut found = self.matching(&tables, query)?;
        trace!(model = %query.model, matches = found.len(), "lookup");
        match found.len() {
            0 => Err(StoreError::not_found(query)),
            1 => Ok(found.remove(0)),
            count => Err(StoreError::multiple_found(query, count)),
        }
    }

    fn construct(&self, model: &str, kwargs: &AttributeMap) -> Result<Record, StoreError> {
        let schema = self.schema(model)?;
        let mut record = Record::new(model);

        for (name, value) in kwargs {
            match schema.get_field(name).map(|field| &field.kind) {
                Some(FieldKind::Attribute { value_type, .. }) => {
                    if !value_type.accepts(value) {
                        return Err(StoreError::invalid_arguments(
                            model,
                            format!("{name} expects {value_type}, got {}", value.type_name()),
                        ));
                    }
                }
                Some(FieldKind::ForeignKey { related, .. }) => {
                    if !matches!(value, Value::Null | Value::Record(_)) {
                        return Err(StoreError::invalid_arguments(
                            model,
                            format!("{name} must be a {related} instance"),
                        ));
                    }
                }
                Some(FieldKind::Reverse { .. } | FieldKind::ManyToMany { .. }) => {
                    return Err(StoreError::invalid_arguments(
                        model,
                        format!("direct assignment to the {name} relation is prohibited"),
                    ));
                }
                None if schema.accepts_constructor_arg(name) => {}
                None => {
                    return Err(StoreError::invalid_arguments(
                        model,
                        format!("unexpected keyword argument '{name}'"),
                    ));
                }
            }
            record.set(name.clone(), value.clone());
        }

        Ok(record)
    }

    fn validate_and_save(&self, record: &mut Record) -> Result<(), StoreError> {
        let schema = self.schema(record.model())?;

        // Defaults only reach the caller's record once the save succeeds
        let mut staged = record.clone();
        for field in schema.fields() {
            if let FieldKind::Attribute {
                default: Some(default),
                ..
            } = &field.kind
            {
                if staged.get(&field.name).map_or(true, Value::is_null) {
                    staged.set(field.name.clone(), default.clone());
                }
            }
        }

        let mut tables = self.tables.write();
        self.check_fields(&tables, schema, &staged)
            .into_result()
            .map_err(|errors| StoreError::ValidationFailed {
                model: schema.name.clone(),
                errors,
            })?;

        let id = staged.id().unwrap_or_default();
        staged.assign_id(id);
        tables
            .rows
            .entry(schema.name.clone())
            .or_default()
            .insert(id, staged.clone());
        tables.mutations += 1;
        *record = staged;
        debug!(model = %schema.name, %id, "saved record");
        Ok(())
    }

    fn refresh(&self, record: &mut Record) -> Result<(), StoreError> {
        let reference = record
            .reference()
            .ok_or_else(|| StoreError::NotPersisted(record.model().to_string()))?;
        let fresh = self.fetch(&reference)?;
        record.replace_from(&fresh);
        Ok(())
    }

    fn fetch(&self, reference: &RecordRef) -> Result<Record, StoreError> {
        self.tables
            .read()
            .get(reference)
            .cloned()
            .ok_or_else(|| StoreError::RecordMissing {
                model: reference.model.clone(),
                id: reference.id,
            })
    }

    fn add_related(
        &self,
        owner: &RecordRef,
        field: &str,
        item: &RecordRef,
    ) -> Result<(), StoreError> {
        let schema = self.schema(&owner.model)?;
        match schema.get_field(field).map(|f| &f.kind) {
            Some(FieldKind::ManyToMany { related }) if related == &item.model => {}
            Some(FieldKind::ManyToMany { related }) => {
                return Err(StoreError::invalid_arguments(
                    &owner.model,
                    format!("{field} expects {related} instances, got {}", item.model),
                ));
            }
            _ => {
                return Err(StoreError::UnknownField {
                    model: owner.model.clone(),
                    field: field.to_string(),
                });
            }
        }

        let mut tables = self.tables.write();
        for reference in [owner, item] {
            if tables.get(reference).is_none() {
                return Err(StoreError::RecordMissing {
                    model: reference.model.clone(),
                    id: reference.id,
                });
            }
        }

        let link = Link {
            owner: owner.clone(),
            field: field.to_string(),
            item: item.clone(),
        };
        if !tables.links.contains(&link) {
            tables.links.push(link);
            tables.mutations += 1;
        }
        Ok(())
    }

    fn relationships(&self, model: &str) -> Vec<CustomRelationship> {
        self.relationships
            .values()
            .filter(|relationship| relationship.involves(model))
            .cloned()
            .collect()
    }

    fn associate(
        &self,
        relationship: &str,
        source: &RecordRef,
        destination: &RecordRef,
    ) -> Result<(), StoreError> {
        let definition = self
            .relationships
            .get(relationship)
            .ok_or_else(|| StoreError::UnknownRelationship(relationship.to_string()))?;
        if source.model != definition.source || destination.model != definition.destination {
            return Err(StoreError::invalid_arguments(
                &source.model,
                format!(
                    "{relationship} relates {} to {}, got {} to {}",
                    definition.source, definition.destination, source.model, destination.model
                ),
            ));
        }

        let mut tables = self.tables.write();
        for reference in [source, destination] {
            if tables.get(reference).is_none() {
                return Err(StoreError::RecordMissing {
                    model: reference.model.clone(),
                    id: reference.id,
                });
            }
        }

        let row = Association {
            relationship: relationship.to_string(),
            source: source.clone(),
            destination: destination.clone(),
        };
        if tables.associations.contains(&row) {
            return Ok(());
        }

        let mut existing = tables
            .associations
            .iter()
            .filter(|other| other.relationship == relationship);
        let taken = match definition.kind {
            RelationshipKind::OneToOne => existing
                .find(|other| other.source == *source || other.destination == *destination)
                .map(|other| {
                    if other.source == *source {
                        source
                    } else {
                        destination
                    }
                }),
            RelationshipKind::OneToMany => existing
                .find(|other| other.destination == *destination)
                .map(|_| destination),
            RelationshipKind::ManyToMany => None,
        };
        if let Some(taken) = taken {
            return Err(StoreError::invalid_arguments(
                &taken.model,
                format!("{taken} already has a {relationship} association"),
            ));
        }

        tables.associations.push(row);
        tables.mutations += 1;
        debug!(%relationship, %source, %destination, "associated records");
        Ok(())
    }
}
