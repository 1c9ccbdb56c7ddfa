//! Named deployment presets
//!
//! The map has been deployed against two collections with different bulk
//! deletion scopes. A preset pins the collection and scope in one switch.

use std::fmt;
use std::str::FromStr;

use crate::config::{QuestmapConfig, ScopeKind};
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// `quests` collection, every document in scope
    Quests,
    /// `markers` collection, only documents with a non-empty `quest` field
    Markers,
}

impl Preset {
    pub const ALL: [Preset; 2] = [Preset::Quests, Preset::Markers];

    pub fn name(self) -> &'static str {
        match self {
            Self::Quests => "quests",
            Self::Markers => "markers",
        }
    }

    /// Overwrite the collection and scope sections of `config`.
    pub fn apply(self, config: &mut QuestmapConfig) {
        match self {
            Self::Quests => {
                config.store.collection = "quests".to_string();
                config.scope.filter = ScopeKind::All;
                config.scope.field = None;
            }
            Self::Markers => {
                config.store.collection = "markers".to_string();
                config.scope.filter = ScopeKind::NonEmpty;
                config.scope.field = Some("quest".to_string());
            }
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}
