//! Builder extensions
//!
//! Extensions customize how designs are interpreted. An extension has a tag
//! and any combination of two capabilities:
//!
//! - [`AttributeExtension`]: invoked for keys of the form `!tag[:args]`
//! - [`ValueExtension`]: invoked for string values of the form `!tag:arg`
//!
//! Every registered extension also receives the build's `commit` or
//! `roll_back` call, so it can finalize or compensate for its side effects.

use crate::error::{BuildError, ConfigError, ExtensionError, HookFailures, HookPhase};
use crate::node::ModelNode;
use design_store::{AttributeMap, Value};
use std::collections::HashMap;
use std::fmt;

mod reference;

pub use reference::ReferenceExtension;

/// Extension capability kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtensionKind {
    /// Attribute (key) extension
    Attribute,
    /// Value extension
    Value,
}

impl fmt::Display for ExtensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attribute => write!(f, "attribute"),
            Self::Value => write!(f, "value"),
        }
    }
}

/// Result of an attribute extension
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeOutput {
    /// Set one attribute on the node
    Attribute(String, Value),
    /// Merge attributes into the node
    Attributes(AttributeMap),
    /// Side effect only
    Nothing,
}

impl TryFrom<Value> for AttributeOutput {
    type Error = Value;

    /// `[name, value]` lists become [`AttributeOutput::Attribute`], mappings
    /// [`AttributeOutput::Attributes`] and null [`AttributeOutput::Nothing`].
    /// Anything else is handed back.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(Self::Nothing),
            Value::Map(map) => Ok(Self::Attributes(map)),
            Value::List(items) if items.len() == 2 && items[0].as_str().is_some() => {
                let mut items = items.into_iter();
                match (items.next(), items.next()) {
                    (Some(Value::String(name)), Some(value)) => Ok(Self::Attribute(name, value)),
                    (first, second) => Err(Value::List(first.into_iter().chain(second).collect())),
                }
            }
            other => Err(other),
        }
    }
}

/// Base trait for every extension
pub trait Extension: Send {
    /// Tag the extension answers to
    fn tag(&self) -> &str;

    /// Attribute capability, if implemented
    fn as_attribute_mut(&mut self) -> Option<&mut dyn AttributeExtension> {
        None
    }

    /// Value capability, if implemented
    fn as_value_mut(&mut self) -> Option<&mut dyn ValueExtension> {
        None
    }

    /// Finalize side effects after a committed build
    ///
    /// # Errors
    ///
    /// Reported as part of the build's [`HookFailures`].
    fn commit(&mut self) -> Result<(), ExtensionError> {
        Ok(())
    }

    /// Compensate for side effects of an aborted or dry-run build
    ///
    /// # Errors
    ///
    /// Reported as part of the build's [`HookFailures`].
    fn roll_back(&mut self) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Handles `!tag[:args]` attribute keys
pub trait AttributeExtension {
    /// Process one attribute
    ///
    /// `args` are the colon separated directive arguments, `value` the
    /// resolved attribute value. The node may be inspected and may have
    /// lifecycle handlers attached.
    ///
    /// # Errors
    ///
    /// Any error aborts the build.
    fn attribute(
        &mut self,
        args: &[String],
        value: Value,
        node: &mut ModelNode,
    ) -> Result<AttributeOutput, BuildError>;
}

/// Resolves `!tag:arg` string values
pub trait ValueExtension {
    /// Resolve `arg`
    ///
    /// # Errors
    ///
    /// Any error aborts the build.
    fn value(&mut self, arg: &str) -> Result<Value, BuildError>;
}

/// Value extension backed by a closure
pub struct FnValueExtension<F> {
    tag: String,
    f: F,
}

/// Value extension from a closure
pub fn value_fn<F>(tag: impl Into<String>, f: F) -> FnValueExtension<F>
where
    F: FnMut(&str) -> Result<Value, BuildError> + Send,
{
    FnValueExtension { tag: tag.into(), f }
}

impl<F> Extension for FnValueExtension<F>
where
    F: FnMut(&str) -> Result<Value, BuildError> + Send,
{
    fn tag(&self) -> &str {
        &self.tag
    }

    fn as_value_mut(&mut self) -> Option<&mut dyn ValueExtension> {
        Some(self)
    }
}

impl<F> ValueExtension for FnValueExtension<F>
where
    F: FnMut(&str) -> Result<Value, BuildError> + Send,
{
    fn value(&mut self, arg: &str) -> Result<Value, BuildError> {
        (self.f)(arg)
    }
}

/// Attribute extension backed by a `Value`-returning closure
///
/// The closure's output is converted with [`AttributeOutput::try_from`].
pub struct FnAttributeExtension<F> {
    tag: String,
    f: F,
}

/// Attribute extension from a closure
pub fn attribute_fn<F>(tag: impl Into<String>, f: F) -> FnAttributeExtension<F>
where
    F: FnMut(&[String], Value, &mut ModelNode) -> Result<Value, BuildError> + Send,
{
    FnAttributeExtension { tag: tag.into(), f }
}

impl<F> Extension for FnAttributeExtension<F>
where
    F: FnMut(&[String], Value, &mut ModelNode) -> Result<Value, BuildError> + Send,
{
    fn tag(&self) -> &str {
        &self.tag
    }

    fn as_attribute_mut(&mut self) -> Option<&mut dyn AttributeExtension> {
        Some(self)
    }
}

impl<F> AttributeExtension for FnAttributeExtension<F>
where
    F: FnMut(&[String], Value, &mut ModelNode) -> Result<Value, BuildError> + Send,
{
    fn attribute(
        &mut self,
        args: &[String],
        value: Value,
        node: &mut ModelNode,
    ) -> Result<AttributeOutput, BuildError> {
        let output = (self.f)(args, value, node)?;
        AttributeOutput::try_from(output).map_err(|found| BuildError::UnsupportedExtensionReturn {
            tag: self.tag.clone(),
            found: found.type_name().to_string(),
        })
    }
}

/// Registered extensions, indexed by tag per capability
pub struct ExtensionRegistry {
    extensions: Vec<Box<dyn Extension>>,
    attribute_tags: HashMap<String, usize>,
    value_tags: HashMap<String, usize>,
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("tags", &self.tags().collect::<Vec<_>>())
            .finish()
    }
}

impl ExtensionRegistry {
    /// Create empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            extensions: Vec::new(),
            attribute_tags: HashMap::new(),
            value_tags: HashMap::new(),
        }
    }

    /// Register an extension
    ///
    /// # Errors
    ///
    /// [`ConfigError::DuplicateExtension`] if another extension already
    /// claims the tag for one of the same capabilities.
    pub fn register(&mut self, mut extension: Box<dyn Extension>) -> Result<(), ConfigError> {
        let tag = extension.tag().to_string();
        let attribute = extension.as_attribute_mut().is_some();
        let value = extension.as_value_mut().is_some();

        for (claimed, kind) in [(attribute, ExtensionKind::Attribute), (value, ExtensionKind::Value)] {
            if claimed && self.index(kind).contains_key(&tag) {
                return Err(ConfigError::DuplicateExtension {
                    kind: kind.to_string(),
                    tag,
                });
            }
        }

        let position = self.extensions.len();
        if attribute {
            self.attribute_tags.insert(tag.clone(), position);
        }
        if value {
            self.value_tags.insert(tag.clone(), position);
        }
        tracing::debug!("Registered extension {tag} (attribute: {attribute}, value: {value})");
        self.extensions.push(extension);
        Ok(())
    }

    fn index(&self, kind: ExtensionKind) -> &HashMap<String, usize> {
        match kind {
            ExtensionKind::Attribute => &self.attribute_tags,
            ExtensionKind::Value => &self.value_tags,
        }
    }

    /// Extension registered for a capability and tag
    pub fn get_mut(&mut self, kind: ExtensionKind, tag: &str) -> Option<&mut dyn Extension> {
        let position = *self.index(kind).get(tag)?;
        let extension: &mut dyn Extension = &mut *self.extensions[position];
        Some(extension)
    }

    /// Whether an attribute extension answers to `tag`
    #[must_use]
    pub fn has_attribute(&self, tag: &str) -> bool {
        self.attribute_tags.contains_key(tag)
    }

    /// Attribute capability for `tag`
    pub fn attribute_mut(&mut self, tag: &str) -> Option<&mut dyn AttributeExtension> {
        let position = *self.attribute_tags.get(tag)?;
        self.extensions[position].as_attribute_mut()
    }

    /// Value capability for `tag`
    pub fn value_mut(&mut self, tag: &str) -> Option<&mut dyn ValueExtension> {
        let position = *self.value_tags.get(tag)?;
        self.extensions[position].as_value_mut()
    }

    /// Tags in registration order
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(|extension| extension.tag())
    }

    /// Number of registered extensions
    #[must_use]
    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    /// No extensions registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Run every `commit` hook, collecting failures
    pub fn commit_all(&mut self) -> HookFailures {
        self.run_hooks(HookPhase::Commit)
    }

    /// Run every `roll_back` hook, collecting failures
    pub fn roll_back_all(&mut self) -> HookFailures {
        self.run_hooks(HookPhase::RollBack)
    }

    fn run_hooks(&mut self, phase: HookPhase) -> HookFailures {
        let mut failures = HookFailures::new(phase);
        for extension in &mut self.extensions {
            let result = match phase {
                HookPhase::Commit => extension.commit(),
                HookPhase::RollBack => extension.roll_back(),
            };
            if let Err(err) = result {
                tracing::warn!("Extension {} failed to {phase}: {err}", extension.tag());
                failures.push(extension.tag(), err);
            }
        }
        failures
    }
}
