//! Testing utilities for the design builder workspace
//!
//! Shared catalog, store and extension fixtures.

#![allow(missing_docs)]

use design_builder::{
    AttributeExtension, AttributeOutput, BuildError, Builder, BuilderConfig, Design, Extension,
    ExtensionError, ModelNode, ValueExtension,
};
use design_store::{
    CustomRelationship, FieldDescriptor, MemoryStore, ModelSchema, RelationshipKind, Value,
    ValueType,
};
use parking_lot::Mutex;
use std::sync::{Arc, Once};

static TRACING: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`; safe to call repeatedly
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A small DCIM-like catalog
///
/// Region <- Site <- Device <- Interface, with manufacturers, device types,
/// tags, circuits and an excluded `auth.User`.
pub fn sample_catalog() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new("dcim", "Region", "regions")
            .field(FieldDescriptor::attribute("name", ValueType::String).required().unique())
            .field(FieldDescriptor::attribute("slug", ValueType::String))
            .field(FieldDescriptor::reverse("sites", "Site", "region")),
        ModelSchema::new("dcim", "Site", "sites")
            .field(FieldDescriptor::attribute("name", ValueType::String).required().unique())
            .field(FieldDescriptor::attribute("status", ValueType::String).default_value("active"))
            .field(FieldDescriptor::attribute("asn", ValueType::Int))
            .field(FieldDescriptor::foreign_key("region", "Region"))
            .field(FieldDescriptor::reverse("devices", "Device", "site"))
            .field(FieldDescriptor::many_to_many("tags", "Tag"))
            .constructor_arg("legacy_id"),
        ModelSchema::new("dcim", "Manufacturer", "manufacturers")
            .field(FieldDescriptor::attribute("name", ValueType::String).required().unique()),
        ModelSchema::new("dcim", "DeviceType", "device types")
            .field(FieldDescriptor::attribute("model", ValueType::String).required())
            .field(FieldDescriptor::foreign_key("manufacturer", "Manufacturer").required()),
        ModelSchema::new("dcim", "Device", "devices")
            .field(FieldDescriptor::attribute("name", ValueType::String).required())
            .field(FieldDescriptor::foreign_key("site", "Site").required())
            .field(FieldDescriptor::foreign_key("device_type", "DeviceType"))
            .field(FieldDescriptor::foreign_key("primary_interface", "Interface"))
            .field(FieldDescriptor::reverse("interfaces", "Interface", "device"))
            .field(FieldDescriptor::many_to_many("tags", "Tag")),
        ModelSchema::new("dcim", "Interface", "interfaces")
            .field(FieldDescriptor::attribute("name", ValueType::String).required())
            .field(FieldDescriptor::foreign_key("device", "Device").required()),
        ModelSchema::new("extras", "Tag", "tags")
            .field(FieldDescriptor::attribute("name", ValueType::String).required().unique()),
        ModelSchema::new("circuits", "Circuit", "circuits")
            .field(FieldDescriptor::attribute("cid", ValueType::String).required().unique()),
        ModelSchema::new("auth", "User", "users")
            .field(FieldDescriptor::attribute("username", ValueType::String).required()),
    ]
}

/// Empty store over [`sample_catalog`]
///
/// Sites reach circuits through the one-to-many `site-circuits` custom
/// relationship.
pub fn sample_store() -> Arc<MemoryStore> {
    Arc::new(
        MemoryStore::new(sample_catalog()).with_relationship(CustomRelationship::new(
            "site-circuits",
            "Site",
            "Circuit",
            RelationshipKind::OneToMany,
        )),
    )
}

/// Builder over `store` with default configuration and `extensions`
pub fn builder_with(store: &Arc<MemoryStore>, extensions: Vec<Box<dyn Extension>>) -> Builder {
    let mut builder = Builder::builder(store.clone()).config(BuilderConfig::default());
    for extension in extensions {
        builder = builder.boxed_extension(extension);
    }
    builder.build().unwrap()
}

/// Parse a YAML design, panicking on malformed fixtures
pub fn design(yaml: &str) -> Design {
    Design::from_yaml_str(yaml).unwrap()
}

/// Shared log of extension calls, e.g. `["audit:attribute", "audit:commit"]`
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Extension that records every call into a shared [`CallLog`]
///
/// As an attribute extension it hands its value back as `[args[0], value]`;
/// as a value extension it echoes its argument. Hooks can be made to fail.
#[derive(Debug, Clone)]
pub struct RecordingExtension {
    tag: String,
    log: CallLog,
    fail_commit: bool,
    fail_roll_back: bool,
}

impl RecordingExtension {
    pub fn new(tag: impl Into<String>, log: CallLog) -> Self {
        Self {
            tag: tag.into(),
            log,
            fail_commit: false,
            fail_roll_back: false,
        }
    }

    #[must_use]
    pub fn failing_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    #[must_use]
    pub fn failing_roll_back(mut self) -> Self {
        self.fail_roll_back = true;
        self
    }

    fn record(&self, call: &str) {
        self.log.lock().push(format!("{}:{call}", self.tag));
    }
}

impl Extension for RecordingExtension {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn as_attribute_mut(&mut self) -> Option<&mut dyn AttributeExtension> {
        Some(self)
    }

    fn as_value_mut(&mut self) -> Option<&mut dyn ValueExtension> {
        Some(self)
    }

    fn commit(&mut self) -> Result<(), ExtensionError> {
        self.record("commit");
        if self.fail_commit {
            return Err(ExtensionError::failed("commit refused"));
        }
        Ok(())
    }

    fn roll_back(&mut self) -> Result<(), ExtensionError> {
        self.record("roll_back");
        if self.fail_roll_back {
            return Err(ExtensionError::failed("roll back refused"));
        }
        Ok(())
    }
}

impl AttributeExtension for RecordingExtension {
    fn attribute(
        &mut self,
        args: &[String],
        value: Value,
        _node: &mut ModelNode,
    ) -> Result<AttributeOutput, BuildError> {
        self.record("attribute");
        Ok(match args.first() {
            Some(name) => AttributeOutput::Attribute(name.clone(), value),
            None => AttributeOutput::Nothing,
        })
    }
}

impl ValueExtension for RecordingExtension {
    fn value(&mut self, arg: &str) -> Result<Value, BuildError> {
        self.record("value");
        Ok(Value::from(arg))
    }
}

/// Count of `call` entries for `tag` in a log
pub fn calls(log: &CallLog, tag: &str, call: &str) -> usize {
    let needle = format!("{tag}:{call}");
    log.lock().iter().filter(|entry| **entry == needle).count()
}
