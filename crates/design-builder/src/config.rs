//! Builder configuration

use crate::error::{ConfigError, LoadError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// App labels whose record types are never addressable from a design
pub const DEFAULT_EXCLUDED_APPS: &[&str] = &[
    "django_celery_beat",
    "admin",
    "users",
    "django_rq",
    "auth",
    "taggit",
    "database",
    "sessions",
    "social_django",
];

/// Default bound on relationship nesting
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Builder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// App labels excluded from the design key registry
    pub excluded_apps: Vec<String>,
    /// Maximum relationship nesting depth
    pub max_depth: usize,
    /// Whether updated records are recorded in the journal
    pub journal_updates: bool,
}

impl BuilderConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With excluded app labels (replaces the defaults)
    #[must_use]
    pub fn with_excluded_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_apps = apps.into_iter().map(Into::into).collect();
        self
    }

    /// Exclude one more app label
    #[must_use]
    pub fn exclude_app(mut self, app: impl Into<String>) -> Self {
        self.excluded_apps.push(app.into());
        self
    }

    /// With maximum nesting depth
    #[inline]
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// With journaling of updated records on or off
    #[inline]
    #[must_use]
    pub fn with_journal_updates(mut self, enabled: bool) -> Self {
        self.journal_updates = enabled;
        self
    }

    /// Whether record types of `app_label` are excluded
    #[must_use]
    pub fn is_excluded(&self, app_label: &str) -> bool {
        self.excluded_apps.iter().any(|app| app == app_label)
    }

    /// Reject settings the builder cannot run with
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for a zero depth bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid("max_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Parse from TOML text
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(LoadError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from YAML text
    ///
    /// # Errors
    ///
    /// Parse or validation failure.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text).map_err(LoadError::from)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    ///
    /// IO, format, parse or validation failure.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            _ => Err(LoadError::UnsupportedFormat(path.to_path_buf()).into()),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            excluded_apps: DEFAULT_EXCLUDED_APPS.iter().map(ToString::to_string).collect(),
            max_depth: DEFAULT_MAX_DEPTH,
            journal_updates: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = BuilderConfig::new();
        assert!(config.is_excluded("auth"));
        assert!(!config.is_excluded("dcim"));
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.journal_updates);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = BuilderConfig::from_toml_str("max_depth = 4").unwrap();
        assert_eq!(config.max_depth, 4);
        assert_eq!(config.excluded_apps.len(), DEFAULT_EXCLUDED_APPS.len());
    }

    #[test]
    fn yaml_overrides() {
        let config =
            BuilderConfig::from_yaml_str("excluded_apps: [auth]\njournal_updates: false\n").unwrap();
        assert_eq!(config.excluded_apps, vec!["auth".to_string()]);
        assert!(!config.journal_updates);
    }

    #[test]
    fn zero_depth_is_rejected() {
        assert!(matches!(
            BuilderConfig::from_toml_str("max_depth = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_depth = 8").unwrap();
        let config = BuilderConfig::from_path(file.path()).unwrap();
        assert_eq!(config.max_depth, 8);

        let other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            BuilderConfig::from_path(other.path()),
            Err(ConfigError::Load(LoadError::UnsupportedFormat(_)))
        ));
    }

    #[test]
    fn builder_methods() {
        let config = BuilderConfig::new()
            .with_excluded_apps(["auth"])
            .exclude_app("users")
            .with_max_depth(3)
            .with_journal_updates(false);
        assert!(config.is_excluded("users"));
        assert_eq!(config.max_depth, 3);
    }
}
