//! Lock cache configuration.
//!
//! Every field has a default, so an empty TOML document is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

fn default_partitions() -> usize {
    128
}

fn default_partition_capacity() -> usize {
    1024
}

fn default_eviction_trigger_ratio() -> f64 {
    0.75
}

fn default_max_name_len() -> usize {
    255
}

fn default_max_staged_mutations() -> usize {
    4096
}

fn default_max_held_locks() -> usize {
    4096
}

/// Sizing and limits for the lock cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    /// Number of independently latched partitions.
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Hard per-partition entry limit. Total memory is bounded by
    /// `partitions * partition_capacity` entries.
    #[serde(default = "default_partition_capacity")]
    pub partition_capacity: usize,

    /// Occupancy ratio above which a committing transaction reclaims entries.
    #[serde(default = "default_eviction_trigger_ratio")]
    pub eviction_trigger_ratio: f64,

    /// Longest permitted entry name, in bytes.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,

    /// Maximum number of staged cache mutations per transaction.
    #[serde(default = "default_max_staged_mutations")]
    pub max_staged_mutations: usize,

    /// Maximum number of simultaneously declared or held lock sessions per transaction.
    #[serde(default = "default_max_held_locks")]
    pub max_held_locks: usize,

    /// Id of the root directory.
    #[serde(default)]
    pub root_id: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            partitions: default_partitions(),
            partition_capacity: default_partition_capacity(),
            eviction_trigger_ratio: default_eviction_trigger_ratio(),
            max_name_len: default_max_name_len(),
            max_staged_mutations: default_max_staged_mutations(),
            max_held_locks: default_max_held_locks(),
            root_id: 0,
        }
    }
}

/// Errors raised while loading a [`CacheConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration parsed but is not usable.
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    /// The TOML document could not be parsed.
    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CacheConfig {
    /// Validate the correctness of the configuration.
    ///
    /// Returns every problem found rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.partitions == 0 {
            errors.push("partitions must be at least 1.".to_owned());
        }
        if self.partition_capacity == 0 {
            errors.push("partition-capacity must be at least 1.".to_owned());
        }
        if !(self.eviction_trigger_ratio > 0.0 && self.eviction_trigger_ratio <= 1.0) {
            errors.push(format!(
                "eviction-trigger-ratio must be in (0, 1], got {}.",
                self.eviction_trigger_ratio
            ));
        }
        if self.max_name_len == 0 {
            errors.push("max-name-len must be at least 1.".to_owned());
        }
        if self.max_staged_mutations == 0 {
            errors.push("max-staged-mutations must be at least 1.".to_owned());
        }
        if self.max_held_locks == 0 {
            errors.push("max-held-locks must be at least 1.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Number of live entries in one partition above which commit-time eviction kicks in.
    #[must_use]
    pub fn eviction_threshold(&self) -> usize {
        #[expect(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss,
            reason = "ratio is validated to (0, 1] and capacities are far below 2^52"
        )]
        let threshold =
            (self.partition_capacity as f64 * self.eviction_trigger_ratio).ceil() as usize;
        threshold.clamp(1, self.partition_capacity)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate().map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading lock cache configuration.");
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
