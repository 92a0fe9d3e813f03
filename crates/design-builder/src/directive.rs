//! Directive syntax
//!
//! Two small grammars live inside design text:
//!
//! - **Key directives** `!<tag>[:<arg>...]` on attribute names, selecting an
//!   action (`!get:name`) or invoking an attribute extension (`!ref`).
//! - **Value references** `!<tag>:<arg>` on string values, resolved through a
//!   value extension (`!ref:core_site`).

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

const VALUE_REF_PATTERN: &str = r"(?s)^!([^:!\s]+):(.*)$";

static VALUE_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(VALUE_REF_PATTERN).expect("value reference pattern compiles"));

/// Load-or-create action of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    /// Look up an existing record; never save
    Get,
    /// Construct a new record
    #[default]
    Create,
    /// Look up and modify an existing record
    Update,
    /// Update when found, create otherwise
    CreateOrUpdate,
}

impl Action {
    /// Action selected by a directive tag
    ///
    /// `create` is the implicit default and has no directive.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "get" => Some(Self::Get),
            "update" => Some(Self::Update),
            "create_or_update" => Some(Self::CreateOrUpdate),
            _ => None,
        }
    }

    /// Directive tag / log name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::CreateOrUpdate => "create_or_update",
        }
    }

    /// Whether the node is located through filter criteria
    #[inline]
    #[must_use]
    pub fn uses_lookup(self) -> bool {
        !matches!(self, Self::Create)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed `!tag[:arg...]` key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    /// Tag after the `!`
    pub tag: String,
    /// Colon separated arguments
    pub args: Vec<String>,
}

impl Directive {
    /// Parse a key; `None` unless it starts with `!` and has a tag
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let body = key.strip_prefix('!')?;
        let mut parts = body.split(':');
        let tag = parts.next().filter(|tag| !tag.is_empty())?;
        Some(Self {
            tag: tag.to_string(),
            args: parts.map(ToString::to_string).collect(),
        })
    }

    /// First argument, if any
    #[inline]
    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.tag)?;
        for arg in &self.args {
            write!(f, ":{arg}")?;
        }
        Ok(())
    }
}

/// Classified key directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    /// Action directive with its filter field
    Action {
        /// Selected action
        action: Action,
        /// Filter field name
        field: Option<String>,
    },
    /// Dispatch to the attribute extension registered for the tag
    AttributeExtension(Directive),
    /// Neither
    Unknown(String),
}

impl DirectiveKind {
    /// Classify; registered attribute extensions take precedence over actions
    #[must_use]
    pub fn classify(directive: Directive, is_extension: impl Fn(&str) -> bool) -> Self {
        if is_extension(&directive.tag) {
            return Self::AttributeExtension(directive);
        }
        match Action::from_tag(&directive.tag) {
            Some(action) => Self::Action {
                action,
                field: directive.args.into_iter().next(),
            },
            None => Self::Unknown(directive.tag),
        }
    }
}

/// Parsed `!tag:arg` value reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueRef<'a> {
    /// Value extension tag
    pub tag: &'a str,
    /// Everything after the first colon
    pub arg: &'a str,
}

impl<'a> ValueRef<'a> {
    /// Parse a string value; `None` for plain strings
    #[must_use]
    pub fn parse(text: &'a str) -> Option<Self> {
        let captures = VALUE_REF.captures(text)?;
        Some(Self {
            tag: captures.get(1)?.as_str(),
            arg: captures.get(2)?.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_action_directive() {
        let directive = Directive::parse("!get:name").unwrap();
        assert_eq!(directive.tag, "get");
        assert_eq!(directive.arg(), Some("name"));

        let kind = DirectiveKind::classify(directive, |_| false);
        assert_eq!(
            kind,
            DirectiveKind::Action {
                action: Action::Get,
                field: Some("name".into())
            }
        );
    }

    #[test]
    fn bare_tag_has_no_args() {
        let directive = Directive::parse("!ref").unwrap();
        assert!(directive.args.is_empty());
        assert_eq!(directive.to_string(), "!ref");
    }

    #[test]
    fn non_directives() {
        assert!(Directive::parse("name").is_none());
        assert!(Directive::parse("!").is_none());
        assert!(Directive::parse("!:x").is_none());
    }

    #[test]
    fn create_is_not_a_directive() {
        let kind = DirectiveKind::classify(Directive::parse("!create:name").unwrap(), |_| false);
        assert_eq!(kind, DirectiveKind::Unknown("create".into()));
    }

    #[test]
    fn extensions_shadow_actions() {
        let kind = DirectiveKind::classify(Directive::parse("!get:x").unwrap(), |tag| tag == "get");
        assert!(matches!(kind, DirectiveKind::AttributeExtension(_)));
    }

    #[test]
    fn value_ref_splits_on_first_colon() {
        let parsed = ValueRef::parse("!ref:site.name:extra").unwrap();
        assert_eq!(parsed.tag, "ref");
        assert_eq!(parsed.arg, "site.name:extra");

        assert!(ValueRef::parse("plain").is_none());
        assert!(ValueRef::parse("!ref").is_none());
        assert!(ValueRef::parse("!!ref:x").is_none());
    }

    proptest! {
        #[test]
        fn directive_display_round_trips(
            tag in "[a-z_]{1,12}",
            args in prop::collection::vec("[a-z0-9_]{1,8}", 0..3),
        ) {
            let key = std::iter::once(format!("!{tag}"))
                .chain(args.iter().cloned())
                .collect::<Vec<_>>()
                .join(":");
            let directive = Directive::parse(&key).unwrap();
            prop_assert_eq!(&directive.tag, &tag);
            prop_assert_eq!(&directive.args, &args);
            prop_assert_eq!(directive.to_string(), key);
        }

        #[test]
        fn value_ref_parses_any_argument(tag in "[a-z_]{1,12}", arg in "[ -~]{0,24}") {
            let text = format!("!{tag}:{arg}");
            let parsed = ValueRef::parse(&text).unwrap();
            prop_assert_eq!(parsed.tag, tag.as_str());
            prop_assert_eq!(parsed.arg, arg.as_str());
        }

        #[test]
        fn strings_without_bang_are_plain(text in "[a-zA-Z0-9 :._-]{0,24}") {
            prop_assert!(ValueRef::parse(&text).is_none());
        }
    }
}
