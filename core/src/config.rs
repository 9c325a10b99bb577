//! Pipeline configuration loaded from TOML. Components never receive the
//! whole tree; the run controller resolves providers and hands each
//! component only the capabilities it needs.

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

/// Analysis engine selection and reporting target.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Display name reported alongside results.
    pub name: String,
    /// Provider identifier resolved through the engine registry.
    pub provider: String,
    /// Feed the report sink delivers accumulated results to.
    pub feed_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            provider: String::new(),
            feed_id: String::new(),
        }
    }
}

/// State store selection. `location = None` opens a temporary store.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub provider: String,
    pub location: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            provider: "sled".to_string(),
            location: None,
        }
    }
}

/// Fetch fan-out limits for the ingestion actor.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestionSettings {
    /// Upper bound on concurrent metadata fetches.
    pub concurrency: usize,
    /// Independent timeout applied to each fetch.
    pub fetch_timeout_secs: u64,
    /// Default TTL hint for submissions that do not carry one.
    pub expiration_seconds: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            fetch_timeout_secs: 60,
            expiration_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TriageConfig {
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
    pub ingestion: IngestionSettings,
}

impl TriageConfig {
    pub fn load(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::load(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = TriageConfig::load("").expect("parse");
        assert_eq!(config.database.provider, "sled");
        assert_eq!(config.ingestion.concurrency, 8);
        assert_eq!(config.ingestion.expiration_seconds, 3600);
    }

    #[test]
    fn parses_full_config() {
        let text = r#"
            [engine]
            name = "yara"
            provider = "yara-local"
            feed_id = "feed-123"

            [database]
            provider = "memory"

            [ingestion]
            concurrency = 4
            fetch_timeout_secs = 10
            expiration_seconds = 600
        "#;
        let config = TriageConfig::load(text).expect("parse");
        assert_eq!(config.engine.provider, "yara-local");
        assert_eq!(config.engine.feed_id, "feed-123");
        assert_eq!(config.database.provider, "memory");
        assert_eq!(config.ingestion.concurrency, 4);
        assert_eq!(config.ingestion.fetch_timeout_secs, 10);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(TriageConfig::load("[engine").is_err());
    }
}
