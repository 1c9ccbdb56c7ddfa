//! Configuration schema
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! usable in-memory setup.

use std::time::Duration;

use questmap_core::{QueryScope, SessionOptions};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default Firestore REST endpoint
pub const DEFAULT_ENDPOINT: &str = "https://firestore.googleapis.com";

/// Default collection name
pub const DEFAULT_COLLECTION: &str = "quests";

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// Top-level questmap configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuestmapConfig {
    pub store: StoreConfig,
    pub scope: ScopeConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Which [`MarkerStore`](questmap_core::MarkerStore) implementation to build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store, nothing is persisted
    #[default]
    Memory,
    /// Cloud Firestore over its REST API
    Firestore,
}

/// Remote store connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    /// Base URL of the REST API, without the `/v1` suffix
    pub endpoint: String,
    /// OAuth bearer token sent alongside the API key
    pub access_token: Option<String>,
    pub collection: String,
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            project_id: None,
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            access_token: None,
            collection: DEFAULT_COLLECTION.to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Filter kind of a [`ScopeConfig`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    #[default]
    All,
    NonEmpty,
}

/// Which documents of the collection the mirror tracks
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeConfig {
    pub filter: ScopeKind,
    /// Field that must be a non-empty string when `filter = "non_empty"`
    pub field: Option<String>,
}

/// Synchronization session tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// How often polling stores check for changes
    pub poll_interval_ms: u64,
    /// Re-subscriptions after a feed closes before going out of sync
    pub resubscribe_attempts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            resubscribe_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `off`, `error`, `warn`, `info`, `debug` or `trace`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl QuestmapConfig {
    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Check the configuration is usable.
    ///
    /// The Firestore backend needs both a project id and an API key.
    pub fn validate(&self) -> ConfigResult<()> {
        let store = &self.store;
        if store.backend == StoreBackend::Firestore {
            if is_blank(store.project_id.as_deref()) {
                return Err(ConfigError::MissingCredential("project_id"));
            }
            if is_blank(store.api_key.as_deref()) {
                return Err(ConfigError::MissingCredential("api_key"));
            }
            if !(store.endpoint.starts_with("http://") || store.endpoint.starts_with("https://")) {
                return Err(ConfigError::invalid(
                    "store.endpoint",
                    format!("`{}` is not an http(s) URL", store.endpoint),
                ));
            }
        }
        if store.collection.trim().is_empty() || store.collection.contains('/') {
            return Err(ConfigError::invalid(
                "store.collection",
                "must be a non-empty collection id without `/`",
            ));
        }
        if store.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "store.request_timeout_secs",
                "must be greater than zero",
            ));
        }

        if self.scope.filter == ScopeKind::NonEmpty && is_blank(self.scope.field.as_deref()) {
            return Err(ConfigError::invalid(
                "scope.field",
                "required when filter = \"non_empty\"",
            ));
        }

        if self.session.poll_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "session.poll_interval_ms",
                "must be greater than zero",
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("`{}` is not one of {}", self.logging.level, LOG_LEVELS.join(", ")),
            ));
        }

        Ok(())
    }

    /// The query scope the repository and its subscription operate on.
    pub fn query_scope(&self) -> QueryScope {
        match (&self.scope.filter, self.scope.field.as_deref()) {
            (ScopeKind::NonEmpty, Some(field)) if !field.trim().is_empty() => {
                QueryScope::non_empty(field.trim())
            }
            _ => QueryScope::all(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            resubscribe_attempts: self.session.resubscribe_attempts,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.session.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.store.request_timeout_secs)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use questmap_core::ScopeFilter;

    fn firestore() -> QuestmapConfig {
        let mut config = QuestmapConfig::default();
        config.store.backend = StoreBackend::Firestore;
        config.store.project_id = Some("questmap-dev".into());
        config.store.api_key = Some("AIza-test".into());
        config
    }

    #[test]
    fn empty_document_yields_defaults() {
        let config = QuestmapConfig::from_toml_str("").unwrap();
        assert_eq!(config, QuestmapConfig::default());
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.collection, "quests");
        assert_eq!(config.session.resubscribe_attempts, 1);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = QuestmapConfig::from_toml_str(
            r#"
            [store]
            backend = "firestore"
            project_id = "questmap-dev"

            [scope]
            filter = "non_empty"
            field = "quest"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Firestore);
        assert_eq!(config.store.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.store.request_timeout_secs, 30);
        assert_eq!(
            config.query_scope().filter,
            ScopeFilter::NonEmpty("quest".into())
        );
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        assert!(QuestmapConfig::from_toml_str("[store]\nbackend = \"sqlite\"").is_err());
    }

    #[test]
    fn firestore_requires_project_id_then_api_key() {
        let mut config = firestore();
        config.validate().unwrap();

        config.store.api_key = Some("  ".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredential("api_key"))
        ));

        config.store.project_id = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredential("project_id"))
        ));
    }

    #[test]
    fn memory_backend_needs_no_credentials() {
        let config = QuestmapConfig::default();
        assert!(config.store.api_key.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut config = firestore();
        config.store.endpoint = "firestore.googleapis.com".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "store.endpoint", .. })
        ));

        let mut config = QuestmapConfig::default();
        config.session.poll_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "session.poll_interval_ms", .. })
        ));

        let mut config = QuestmapConfig::default();
        config.store.collection = "a/b".into();
        assert!(config.validate().is_err());

        let mut config = QuestmapConfig::default();
        config.logging.level = "loud".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "logging.level", .. })
        ));
    }

    #[test]
    fn non_empty_scope_needs_a_field() {
        let mut config = QuestmapConfig::default();
        config.scope.filter = ScopeKind::NonEmpty;
        assert!(config.validate().is_err());
        assert_eq!(config.query_scope(), QueryScope::all());

        config.scope.field = Some("quest".into());
        config.validate().unwrap();
        assert_eq!(config.query_scope(), QueryScope::non_empty("quest"));
    }

    #[test]
    fn derived_values() {
        let mut config = QuestmapConfig::default();
        config.session.poll_interval_ms = 250;
        config.session.resubscribe_attempts = 3;

        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.session_options().resubscribe_attempts, 3);
    }

    #[test]
    fn effective_config_renders_back_to_toml() {
        let config = firestore();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("backend = \"firestore\""));
        assert_eq!(QuestmapConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
