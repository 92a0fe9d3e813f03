//! Attribute parsing

use super::ModelNode;
use crate::builder::Builder;
use crate::directive::{Directive, DirectiveKind};
use crate::error::BuildError;
use crate::extension::AttributeOutput;
use design_store::{AttributeMap, Value};
use std::collections::VecDeque;

const CUSTOM_FIELDS: &str = "custom_fields";
const DEFERRED: &str = "deferred";

impl ModelNode {
    /// Split raw attributes into action, filter, fields, kwargs and custom
    /// fields
    pub(super) fn parse_attributes(
        &mut self,
        builder: &mut Builder,
        mut pending: AttributeMap,
    ) -> Result<(), BuildError> {
        if let Some(custom) = pending.shift_remove(CUSTOM_FIELDS) {
            match builder.resolve_values(&custom)? {
                Value::Map(map) => self.custom_fields = map,
                Value::Null => {}
                other => {
                    return Err(self.implementation_error(format!(
                        "custom_fields must be a mapping, got {}",
                        other.type_name()
                    )))
                }
            }
        }

        if !self.schema.has_field(DEFERRED) {
            if let Some(flag) = pending.shift_remove(DEFERRED) {
                self.deferred = match flag {
                    Value::Bool(flag) => flag,
                    Value::Null => false,
                    other => {
                        return Err(self.implementation_error(format!(
                            "deferred must be a boolean, got {}",
                            other.type_name()
                        )))
                    }
                };
            }
        }

        let mut queue: VecDeque<String> = pending.keys().cloned().collect();
        while let Some(key) = queue.pop_front() {
            let Some(raw) = pending.shift_remove(&key) else {
                continue;
            };
            let value = builder.resolve_values(&raw)?;

            if let Some(directive) = Directive::parse(&key) {
                let kind = DirectiveKind::classify(directive, |tag| {
                    builder.extensions().has_attribute(tag)
                });
                match kind {
                    DirectiveKind::AttributeExtension(directive) => {
                        let extension = builder
                            .extensions_mut()
                            .attribute_mut(&directive.tag)
                            .ok_or_else(|| BuildError::UnknownAction {
                                model: self.schema.name.clone(),
                                tag: directive.tag.clone(),
                            })?;
                        match extension.attribute(&directive.args, value, self)? {
                            AttributeOutput::Attribute(name, value) => {
                                pending.insert(name.clone(), value);
                                queue.push_back(name);
                            }
                            AttributeOutput::Attributes(map) => {
                                for (name, value) in map {
                                    pending.insert(name.clone(), value);
                                    queue.push_back(name);
                                }
                            }
                            AttributeOutput::Nothing => {}
                        }
                    }
                    DirectiveKind::Action { action, field } => {
                        let field = field.ok_or_else(|| {
                            self.implementation_error(format!("!{action} requires a field name"))
                        })?;
                        match self.action {
                            Some(first) if first != action => {
                                return Err(BuildError::ConflictingActions {
                                    model: self.schema.name.clone(),
                                    first,
                                    second: action,
                                });
                            }
                            _ => self.action = Some(action),
                        }
                        self.filter.insert(field, value);
                    }
                    DirectiveKind::Unknown(tag) => {
                        return Err(BuildError::UnknownAction {
                            model: self.schema.name.clone(),
                            tag,
                        });
                    }
                }
                continue;
            }

            if let Some((field, search)) = key.split_once("__") {
                if !self.schema.has_field(field) {
                    return Err(BuildError::NotAField {
                        model: self.schema.name.clone(),
                        field: field.to_string(),
                    });
                }
                let mut lookup = AttributeMap::new();
                lookup.insert(format!("!get:{search}"), value);
                self.merge_attribute(field.to_string(), Value::Map(lookup))?;
                continue;
            }

            if self.schema.has_field(&key) || self.custom_relationship(&key).is_some() {
                self.merge_attribute(key, value)?;
            } else {
                self.kwargs.insert(key, value);
            }
        }

        if self.action.is_none() {
            self.action = Some(crate::directive::Action::Create);
        }
        Ok(())
    }

    /// Insert a field assignment, merging mappings given in pieces
    fn merge_attribute(&mut self, field: String, value: Value) -> Result<(), BuildError> {
        if let Some(Value::Map(existing)) = self.attributes.get_mut(&field) {
            return match value {
                Value::Map(more) => {
                    existing.extend(more);
                    Ok(())
                }
                other => Err(BuildError::implementation(
                    self.schema.name.clone(),
                    format!(
                        "{field} is given both as a lookup and as a {} value",
                        other.type_name()
                    ),
                )),
            };
        }
        self.attributes.insert(field, value);
        Ok(())
    }
}
