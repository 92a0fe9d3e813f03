//! Load-or-create

use super::ModelNode;
use crate::builder::Builder;
use crate::directive::Action;
use crate::error::BuildError;
use design_store::{render_criteria, AttributeMap, FieldKind, Query, Record, StoreError, Value};

impl ModelNode {
    /// Obtain the backing record according to the node's action
    pub(super) fn load_instance(&mut self, builder: &mut Builder) -> Result<(), BuildError> {
        match self.action() {
            Action::Get => {
                let criteria = self.resolve_filter(builder, false)?;
                let query = Query::new(self.schema.name.clone(), criteria);
                let record = self.lookup(builder, &query)?;
                self.record = Some(record);
                self.created = false;
            }
            action @ (Action::Update | Action::CreateOrUpdate) => {
                self.expand_filter();
                let criteria = self.resolve_filter(builder, true)?;
                let query =
                    Query::new(self.schema.name.clone(), criteria).within(self.scope.clone());

                match builder.store().lookup(&query) {
                    Ok(record) => {
                        self.record = Some(record);
                        self.created = false;
                    }
                    Err(StoreError::NotFound { .. }) if action == Action::Update => {
                        return Err(BuildError::NoMatchForUpdate {
                            model: self.schema.name.clone(),
                            criteria: render_criteria(&query.criteria),
                        });
                    }
                    Err(StoreError::NotFound { .. }) => {
                        tracing::debug!(
                            "No {} matching {}, creating",
                            self.schema.name,
                            render_criteria(&query.criteria)
                        );
                        for (field, value) in query.criteria {
                            self.attributes.insert(field, value);
                        }
                        self.construct(builder)?;
                    }
                    Err(err) => return Err(lookup_error(err)),
                }
            }
            Action::Create => self.construct(builder)?,
        }
        Ok(())
    }

    fn lookup(&self, builder: &Builder, query: &Query) -> Result<Record, BuildError> {
        builder.store().lookup(query).map_err(lookup_error)
    }

    fn construct(&mut self, builder: &Builder) -> Result<(), BuildError> {
        let record = builder
            .store()
            .construct(&self.schema.name, &self.kwargs)
            .map_err(|err| match err {
                StoreError::InvalidArguments { model, message } => {
                    BuildError::implementation(model, message)
                }
                other => other.into(),
            })?;
        self.record = Some(record);
        self.created = true;
        Ok(())
    }

    /// Rewrite `a__b` filter keys into `a: {"!get:b": v}` lookups
    fn expand_filter(&mut self) {
        let filter = std::mem::take(&mut self.filter);
        for (key, value) in filter {
            let split = key
                .split_once("__")
                .map(|(field, search)| (field.to_string(), search.to_string()));
            let (field, value) = match split {
                Some((field, search)) => {
                    let mut lookup = AttributeMap::new();
                    lookup.insert(format!("!get:{search}"), value);
                    (field, Value::Map(lookup))
                }
                None => (key, value),
            };
            merge_lookup(&mut self.filter, field, value);
        }
    }

    /// Resolve mapping-valued filter entries into record references
    fn resolve_filter(
        &self,
        builder: &mut Builder,
        save_children: bool,
    ) -> Result<AttributeMap, BuildError> {
        let mut criteria = AttributeMap::new();
        for (key, value) in &self.filter {
            let Value::Map(lookup) = value else {
                criteria.insert(key.clone(), value.clone());
                continue;
            };

            let related = match self.schema.get_field(key).map(|field| &field.kind) {
                Some(FieldKind::ForeignKey { related, .. }) => related.clone(),
                _ => {
                    return Err(self.implementation_error(format!(
                        "{key} is not a relationship and cannot be looked up by mapping"
                    )))
                }
            };

            let mut child =
                self.create_child(builder, &related, lookup, None, AttributeMap::new())?;
            if save_children && child.action() != Action::Get {
                child.save(builder)?;
            }
            let reference = child.reference().ok_or_else(|| {
                self.implementation_error(format!("{key} lookup did not resolve to a saved {related}"))
            })?;
            criteria.insert(key.clone(), Value::Record(reference));
        }
        Ok(criteria)
    }
}

fn merge_lookup(filter: &mut AttributeMap, field: String, value: Value) {
    if let (Some(Value::Map(existing)), Value::Map(more)) = (filter.get_mut(&field), &value) {
        existing.extend(more.clone());
        return;
    }
    filter.insert(field, value);
}

fn lookup_error(err: StoreError) -> BuildError {
    match err {
        StoreError::NotFound { model, criteria } => BuildError::NotFound { model, criteria },
        StoreError::MultipleFound {
            model, criteria, ..
        } => BuildError::Ambiguous { model, criteria },
        other => other.into(),
    }
}
