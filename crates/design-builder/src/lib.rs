//! Design Builder
//!
//! Interprets a declarative, nested description of desired records (a
//! *design*) and materializes it against a [`Store`](design_store::Store)
//! through get, create and update operations, journaling every record it
//! touches.
//!
//! # Core Concepts
//!
//! - [`Design`]: Record-type keys mapped to attribute mappings
//! - [`Builder`]: Walks a design, drives the store, runs extension hooks
//! - [`ModelNode`]: Resolver for one attribute mapping of one record type
//! - [`Journal`]: Which records were created and which were updated
//! - [`Extension`]: Pluggable `!tag` handlers for keys and values
//!
//! # Directives
//!
//! | syntax | meaning |
//! |---|---|
//! | `"!get:name": HQ` | look up an existing record by `name` |
//! | `"!update:name": HQ` | look up and modify; fails if missing |
//! | `"!create_or_update:name": HQ` | modify when found, create otherwise |
//! | `region__name: East` | relate to the `region` whose `name` is `East` |
//! | `"!ref": hq` | name this record `hq` |
//! | `site: "!ref:hq"` | use the record named `hq` |
//!
//! # Example
//!
//! ```rust
//! use design_builder::{Builder, Design};
//! use design_store::{FieldDescriptor, MemoryStore, ModelSchema, ValueType};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new([
//!     ModelSchema::new("dcim", "Region", "regions")
//!         .field(FieldDescriptor::attribute("name", ValueType::String).required()),
//!     ModelSchema::new("dcim", "Site", "sites")
//!         .field(FieldDescriptor::attribute("name", ValueType::String).required())
//!         .field(FieldDescriptor::foreign_key("region", "Region")),
//! ]));
//!
//! let design = Design::from_yaml_str(r#"
//! regions:
//!   name: East
//! sites:
//!   name: HQ
//!   region__name: East
//! "#).unwrap();
//!
//! let mut builder = Builder::new(store.clone()).unwrap();
//! builder.implement_design(&design, true).unwrap();
//!
//! assert_eq!(store.count("Site"), 1);
//! assert_eq!(builder.journal().len(), 2);
//! ```

#![warn(unreachable_pub)]

pub mod builder;
pub mod config;
pub mod design;
pub mod directive;
pub mod error;
pub mod extension;
pub mod journal;
pub mod node;
pub mod registry;

pub use builder::{Builder, BuilderBuilder};
pub use config::{BuilderConfig, DEFAULT_EXCLUDED_APPS, DEFAULT_MAX_DEPTH};
pub use design::Design;
pub use directive::{Action, Directive, DirectiveKind, ValueRef};
pub use error::{
    BuildError, ConfigError, DesignValidationError, ExtensionError, HookFailures, HookPhase,
    LoadError,
};
pub use extension::{
    attribute_fn, value_fn, AttributeExtension, AttributeOutput, Extension, ExtensionKind,
    ExtensionRegistry, FnAttributeExtension, FnValueExtension, ReferenceExtension,
    ValueExtension,
};
pub use journal::{Journal, JournalEntries};
pub use node::{Handler, LifecycleEvent, ModelNode};
pub use registry::ModelRegistry;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for building designs
    pub use crate::{
        Action, AttributeExtension, AttributeOutput, BuildError, Builder, BuilderConfig, Design,
        Extension, ExtensionError, Journal, LifecycleEvent, ModelNode, ModelRegistry,
        ValueExtension,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
