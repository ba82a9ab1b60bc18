use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database::connection::get_database_url;

pub const DEFAULT_MAX_SLOTS: u8 = 5;
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 100;

/// Engine configuration. Defaults describe a five slot store with automatic
/// enrichment sync, backed by `wrangler.db` in the working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// sea-orm connection URL (`sqlite://...` or `sqlite::memory:`)
    pub database_url: String,
    /// Number of dataset slots available (slot ids run 1..=max_slots)
    pub max_slots: u8,
    /// Recompute stale enriched datasets immediately after an accepted merge
    pub auto_sync: bool,
    /// Rows written per INSERT statement
    pub insert_chunk_size: usize,
    pub enrichment: EnrichmentConfig,
    pub image_detection: ImageDetectionConfig,
    pub sync: SyncPolicyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: get_database_url(None),
            max_slots: DEFAULT_MAX_SLOTS,
            auto_sync: true,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
            enrichment: EnrichmentConfig::default(),
            image_detection: ImageDetectionConfig::default(),
            sync: SyncPolicyConfig::default(),
        }
    }
}

/// Candidate formats tried in order by the date enrichment functions.
/// Formats use chrono's strftime syntax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub date_formats: Vec<String>,
    pub datetime_formats: Vec<String>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            date_formats: [
                "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y", "%m-%d-%Y",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
            datetime_formats: [
                "%Y-%m-%d %H:%M:%S",
                "%Y-%m-%dT%H:%M:%S",
                "%m/%d/%Y %H:%M:%S",
                "%d/%m/%Y %H:%M:%S",
                "%Y-%m-%d %H:%M",
                "%m/%d/%Y %H:%M",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
        }
    }
}

/// Heuristics used to flag embedded image columns at ingestion time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDetectionConfig {
    pub prefix: String,
    pub min_length: usize,
    pub sample_size: usize,
}

impl Default for ImageDetectionConfig {
    fn default() -> Self {
        Self {
            prefix: "data:image".to_string(),
            min_length: 100,
            sample_size: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncPolicyConfig {
    /// When set, a recompute whose failed-field ratio exceeds this value moves
    /// the enriched dataset to `SYNC_ERROR`. Unset means field failures never
    /// escalate.
    pub max_field_failure_ratio: Option<f64>,
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(yaml).context("Failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML configuration file and apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading engine configuration from {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, used when no config file is given
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("WRANGLER_DATABASE_URL") {
            self.database_url = url;
        }
        if let Ok(value) = std::env::var("WRANGLER_MAX_SLOTS") {
            match value.parse::<u8>() {
                Ok(slots) if slots > 0 => self.max_slots = slots,
                _ => warn!("Ignoring invalid WRANGLER_MAX_SLOTS value '{}'", value),
            }
        }
        if let Ok(value) = std::env::var("WRANGLER_AUTO_SYNC") {
            match value.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.auto_sync = true,
                "0" | "false" | "no" | "off" => self.auto_sync = false,
                _ => warn!("Ignoring invalid WRANGLER_AUTO_SYNC value '{}'", value),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_slots == 0 {
            anyhow::bail!("max_slots must be at least 1");
        }
        if self.insert_chunk_size == 0 {
            anyhow::bail!("insert_chunk_size must be at least 1");
        }
        if let Some(ratio) = self.sync.max_field_failure_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                anyhow::bail!(
                    "sync.max_field_failure_ratio must be between 0 and 1, got {}",
                    ratio
                );
            }
        }
        Ok(())
    }

    /// In-memory configuration with automatic sync toggled as requested
    pub fn in_memory(auto_sync: bool) -> Self {
        Self {
            database_url: get_database_url(Some(":memory:")),
            auto_sync,
            ..Self::default()
        }
    }
}
