//! Design Store
//!
//! The data model and store capability interface consumed by the design
//! builder engine.
//!
//! # Core Concepts
//!
//! - [`Value`]: Dynamically typed design payload (scalars, lists, mappings, record references)
//! - [`Record`]: A store record with its fields and custom fields
//! - [`ModelSchema`]: Reflected description of a record type and its fields
//! - [`CustomRelationship`]: Store-managed link between two record types
//! - [`Store`]: Lookup / construct / validate-and-save / refresh capability trait
//! - [`MemoryStore`]: In-memory [`Store`] implementation for tests and local runs
//!
//! # Example
//!
//! ```rust
//! use design_store::{attrs, FieldDescriptor, MemoryStore, ModelSchema, Query, Store, ValueType};
//!
//! let store = MemoryStore::new([ModelSchema::new("dcim", "Region", "regions")
//!     .field(FieldDescriptor::attribute("slug", ValueType::String).required())]);
//!
//! store.seed("Region", attrs! { "slug" => "us-east" }).unwrap();
//!
//! let found = store.lookup(&Query::new("Region", attrs! { "slug" => "us-east" })).unwrap();
//! assert!(found.is_persisted());
//! ```

#![warn(unreachable_pub)]

mod memory;
mod record;
mod schema;
mod store;
mod value;

pub use memory::MemoryStore;
pub use record::{Record, RecordId, RecordRef};
pub use schema::{
    CustomRelationship, FieldDescriptor, FieldKind, ModelSchema, RelationshipKind, ValueType,
};
pub use store::{Query, RelationScope, Store, StoreError, ValidationErrors};
pub use value::{render_criteria, AttributeMap, Value};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with stores
    pub use crate::{
        attrs, AttributeMap, CustomRelationship, FieldDescriptor, FieldKind, MemoryStore,
        ModelSchema, Query, Record, RecordId, RecordRef, RelationScope, RelationshipKind, Store,
        StoreError, Value, ValueType,
    };
}

/// Build an [`AttributeMap`] from `key => value` pairs.
///
/// Values go through [`Value::from`], so nested `attrs!` calls produce
/// nested mappings.
#[macro_export]
macro_rules! attrs {
    () => {
        $crate::AttributeMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::AttributeMap::new();
        $(
            map.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        map
    }};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
