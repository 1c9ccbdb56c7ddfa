//! Configuration loading
//!
//! Precedence, lowest first: built-in defaults, config file, preset,
//! environment variables. The result is validated before it is returned.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config::QuestmapConfig;
use crate::error::{ConfigError, ConfigResult};
use crate::preset::Preset;

pub const ENV_API_KEY: &str = "QUESTMAP_API_KEY";
pub const ENV_PROJECT_ID: &str = "QUESTMAP_PROJECT_ID";
pub const ENV_ENDPOINT: &str = "QUESTMAP_ENDPOINT";
pub const ENV_ACCESS_TOKEN: &str = "QUESTMAP_ACCESS_TOKEN";
pub const ENV_COLLECTION: &str = "QUESTMAP_COLLECTION";

/// Default config file path: `$XDG_CONFIG_HOME/questmap/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("questmap").join("config.toml"))
}

/// Builder for a validated [`QuestmapConfig`].
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    preset: Option<Preset>,
    use_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            preset: None,
            use_env: true,
        }
    }

    /// Read this file instead of the default location. Unlike the default
    /// location, an explicit path must exist.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Skip the `QUESTMAP_*` environment overrides.
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn load(&self) -> ConfigResult<QuestmapConfig> {
        let mut config = match &self.path {
            Some(path) => read_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => read_file(&path)?,
                None => {
                    debug!("No config file found, using defaults");
                    QuestmapConfig::default()
                }
            },
        };

        if let Some(preset) = self.preset {
            debug!(%preset, "Applying preset");
            preset.apply(&mut config);
        }

        if self.use_env {
            apply_overrides(&mut config, |key| std::env::var(key).ok());
        }

        config.validate()?;
        info!(
            backend = ?config.store.backend,
            collection = %config.store.collection,
            scope = %config.query_scope(),
            "Configuration loaded"
        );
        Ok(config)
    }
}

fn read_file(path: &Path) -> ConfigResult<QuestmapConfig> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = QuestmapConfig::from_toml_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Read config file");
    Ok(config)
}

/// Apply `QUESTMAP_*` overrides using `lookup` to read variables.
///
/// Empty values count as unset.
pub fn apply_overrides<F>(config: &mut QuestmapConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(key) = get(ENV_API_KEY) {
        config.store.api_key = Some(key);
    }
    if let Some(project) = get(ENV_PROJECT_ID) {
        config.store.project_id = Some(project);
    }
    if let Some(endpoint) = get(ENV_ENDPOINT) {
        config.store.endpoint = endpoint;
    }
    if let Some(token) = get(ENV_ACCESS_TOKEN) {
        config.store.access_token = Some(token);
    }
    if let Some(collection) = get(ENV_COLLECTION) {
        config.store.collection = collection;
    }
}
