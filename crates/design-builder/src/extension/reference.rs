//! Named references to records created earlier in the same design

use super::{AttributeExtension, AttributeOutput, Extension, ValueExtension};
use crate::error::{BuildError, ExtensionError};
use crate::node::{LifecycleEvent, ModelNode};
use design_store::{Record, Value};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

type Table = Arc<Mutex<IndexMap<String, Option<Record>>>>;

/// The `ref` extension
///
/// `"!ref": core_site` names the node's record; `"!ref:core_site"` resolves
/// to that record and `"!ref:core_site.name"` to one of its fields.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ReferenceExtension {
    refs: Table,
}

impl ReferenceExtension {
    /// Extension tag
    pub const TAG: &'static str = "ref";

    /// Create with an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered names, in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.refs.lock().keys().cloned().collect()
    }

    /// Record captured for `name`, if any
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Record> {
        self.refs.lock().get(name).cloned().flatten()
    }

    /// Forget every reference
    pub fn clear(&self) {
        self.refs.lock().clear();
    }
}

impl Extension for ReferenceExtension {
    fn tag(&self) -> &str {
        Self::TAG
    }

    fn as_attribute_mut(&mut self) -> Option<&mut dyn AttributeExtension> {
        Some(self)
    }

    fn as_value_mut(&mut self) -> Option<&mut dyn ValueExtension> {
        Some(self)
    }

    fn roll_back(&mut self) -> Result<(), ExtensionError> {
        self.clear();
        Ok(())
    }
}

impl AttributeExtension for ReferenceExtension {
    fn attribute(
        &mut self,
        _args: &[String],
        value: Value,
        node: &mut ModelNode,
    ) -> Result<AttributeOutput, BuildError> {
        let name = value
            .as_str()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                BuildError::implementation(
                    node.model(),
                    format!("!ref expects a reference name, got {}", value.type_name()),
                )
            })?
            .to_string();

        self.refs.lock().insert(name.clone(), None);
        for event in [LifecycleEvent::Loaded, LifecycleEvent::PostInstanceSave] {
            let refs = Arc::clone(&self.refs);
            let name = name.clone();
            node.on(event, move |record, _store| {
                refs.lock().insert(name.clone(), Some(record.clone()));
                Ok(())
            });
        }
        Ok(AttributeOutput::Nothing)
    }
}

impl ValueExtension for ReferenceExtension {
    fn value(&mut self, arg: &str) -> Result<Value, BuildError> {
        let (name, field) = match arg.split_once('.') {
            Some((name, field)) => (name, Some(field)),
            None => (arg, None),
        };

        let refs = self.refs.lock();
        let record = match refs.get(name) {
            None => return Err(BuildError::UnknownReference(name.to_string())),
            Some(Some(record)) if record.is_persisted() => record,
            Some(_) => return Err(BuildError::UnresolvedReference(name.to_string())),
        };

        match field {
            None => record
                .reference()
                .map(Value::Record)
                .ok_or_else(|| BuildError::UnresolvedReference(name.to_string())),
            Some("id") => Ok(record
                .id()
                .map_or(Value::Null, |id| Value::from(id.to_string()))),
            Some(field) => record.get(field).cloned().ok_or_else(|| {
                BuildError::implementation(
                    record.model(),
                    format!("reference {name} has no field {field}"),
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use design_store::{RecordId, RecordRef};

    fn saved(model: &str, name: &str) -> Record {
        let mut record = Record::new(model);
        record.set("name", name);
        record.assign_id(RecordId::new());
        record
    }

    #[test]
    fn unknown_and_unresolved_names() {
        let mut ext = ReferenceExtension::new();
        assert!(matches!(ext.value("nope"), Err(BuildError::UnknownReference(_))));

        ext.refs.lock().insert("pending".into(), None);
        assert!(matches!(
            ext.value("pending"),
            Err(BuildError::UnresolvedReference(_))
        ));

        ext.refs
            .lock()
            .insert("unsaved".into(), Some(Record::new("Site")));
        assert!(matches!(
            ext.value("unsaved"),
            Err(BuildError::UnresolvedReference(_))
        ));
    }

    #[test]
    fn resolves_record_and_fields() {
        let mut ext = ReferenceExtension::new();
        let record = saved("Site", "HQ");
        let id = record.id().unwrap();
        ext.refs.lock().insert("hq".into(), Some(record));

        assert_eq!(
            ext.value("hq").unwrap(),
            Value::Record(RecordRef::new("Site", id))
        );
        assert_eq!(ext.value("hq.name").unwrap(), Value::from("HQ"));
        assert_eq!(ext.value("hq.id").unwrap(), Value::from(id.to_string()));
        assert!(ext.value("hq.colour").unwrap_err().is_implementation_error());
    }

    #[test]
    fn roll_back_clears_but_clones_share() {
        let mut ext = ReferenceExtension::new();
        let view = ext.clone();
        ext.refs.lock().insert("hq".into(), Some(saved("Site", "HQ")));
        assert_eq!(view.names(), vec!["hq".to_string()]);

        ext.roll_back().unwrap();
        assert!(view.get("hq").is_none());
    }
}
