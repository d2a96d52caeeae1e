//! Configuration of the benchmark binary.
//!
//! The `[cache]` table configures the lock manager itself, `[workload]` the synthetic load.

use std::path::{Path, PathBuf};

use nslock::config::{CacheConfig, ConfigError};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn default_threads() -> usize {
    4
}

fn default_ops_per_thread() -> usize {
    10_000
}

fn default_directories() -> usize {
    64
}

fn default_lookup_ratio() -> f64 {
    0.8
}

/// Shape of the synthetic workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkloadConfig {
    /// Worker threads, one transaction stream each.
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Operations each worker runs. Every operation is its own transaction.
    #[serde(default = "default_ops_per_thread")]
    pub ops_per_thread: usize,

    /// Top-level directories created before the run; workers create files beneath them.
    #[serde(default = "default_directories")]
    pub directories: usize,

    /// Fraction of operations that are lookups rather than creates.
    #[serde(default = "default_lookup_ratio")]
    pub lookup_ratio: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            ops_per_thread: default_ops_per_thread(),
            directories: default_directories(),
            lookup_ratio: default_lookup_ratio(),
        }
    }
}

/// Complete benchmark configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Lock cache sizing.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Synthetic workload.
    #[serde(default)]
    pub workload: WorkloadConfig,
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns every problem found rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = self.cache.validate().err().unwrap_or_default();

        if self.workload.threads == 0 {
            errors.push("workload.threads must be at least 1.".to_owned());
        }
        if self.workload.directories == 0 {
            errors.push("workload.directories must be at least 1.".to_owned());
        }
        if !(0.0..=1.0).contains(&self.workload.lookup_ratio) {
            errors.push(format!(
                "workload.lookup-ratio must be in [0, 1], got {}.",
                self.workload.lookup_ratio
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("nslock").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("nslock").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/nslock/config.toml"));

        paths
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads the explicit path if given, else the first config file found on the search path,
    /// else the defaults. The result is validated.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let found = external_config_path.map(Path::to_path_buf).or_else(|| {
            Self::config_search_paths()
                .into_iter()
                .find(|p| p.exists())
        });
        let config = match found {
            Some(path) => Self::load_from_file(&path)?,
            None => {
                debug!("No configuration file found, using defaults.");
                Self::default()
            }
        };
        config.validate().map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_keeps_defaults() {
        let config: Config = toml::from_str(
            r"
            [cache]
            partitions = 8

            [workload]
            threads = 2
            ",
        )
        .unwrap();
        assert_eq!(config.cache.partitions, 8);
        assert_eq!(config.cache.partition_capacity, 1024);
        assert_eq!(config.workload.threads, 2);
        assert_eq!(config.workload.directories, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cache_and_workload_problems_are_both_reported() {
        let mut config = Config::default();
        config.cache.partitions = 0;
        config.workload.lookup_ratio = 2.0;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
