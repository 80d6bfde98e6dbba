//! Runtime Configuration Module
//!
//! Provides configuration loading for the actor runtime.
//! Supports loading from TOML files with environment-specific overrides.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::defaults;

/// Main runtime configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Actor group (pool scheduler) settings
    pub group: GroupConfig,

    /// Named worker settings
    pub worker: WorkerConfig,
}

/// Elastic thread pool settings for an actor group
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct GroupConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub idle_timeout_ms: u64,
}

/// Named worker settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Bounded queue capacity; producers block beyond this
    pub max_queue_size: usize,

    /// Backing thread linger grace period
    pub linger_ms: u64,

    /// Early-fire window for timers
    pub timer_tolerance_ms: u64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            min_threads: defaults::group::MIN_THREADS,
            max_threads: defaults::group::MAX_THREADS,
            idle_timeout_ms: defaults::group::IDLE_TIMEOUT_MS,
        }
    }
}

impl GroupConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Reject pool shapes that could never run work
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            bail!("group.max_threads must be at least 1");
        }
        if self.min_threads > self.max_threads {
            bail!(
                "group.min_threads ({}) exceeds group.max_threads ({})",
                self.min_threads,
                self.max_threads
            );
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: defaults::worker::MAX_QUEUE_SIZE,
            linger_ms: defaults::worker::LINGER_MS,
            timer_tolerance_ms: defaults::worker::TIMER_TOLERANCE_MS,
        }
    }
}

impl WorkerConfig {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn timer_tolerance(&self) -> Duration {
        Duration::from_millis(self.timer_tolerance_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            bail!("worker.max_queue_size must be at least 1");
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/runtime.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables (ACTOR_RUNTIME_ prefix)
        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        debug!(?config, "Runtime configuration loaded");
        Ok(config)
    }

    /// Parse an inline TOML document; missing keys take their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. to write out a starter config file
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.group.validate().context("Invalid group configuration")?;
        self.worker.validate().context("Invalid worker configuration")?;
        Ok(())
    }
}

/// Convenience function to load configuration with defaults
pub fn load_config(environment: Option<&str>) -> Result<RuntimeConfig> {
    RuntimeConfig::load(None, environment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_base_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("runtime.toml");

        let config_content = r#"
[group]
min_threads = 2
max_threads = 8
idle_timeout_ms = 250

[worker]
max_queue_size = 16
"#;

        fs::write(&config_path, config_content).unwrap();

        let config = RuntimeConfig::load(Some(&config_path), None).unwrap();

        assert_eq!(config.group.min_threads, 2);
        assert_eq!(config.group.max_threads, 8);
        assert_eq!(config.group.idle_timeout(), Duration::from_millis(250));
        assert_eq!(config.worker.max_queue_size, 16);
        // Unset keys fall back to defaults
        assert_eq!(config.worker.linger_ms, defaults::worker::LINGER_MS);
        assert_eq!(
            config.worker.timer_tolerance(),
            Duration::from_millis(defaults::worker::TIMER_TOLERANCE_MS)
        );
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(RuntimeConfig::load(Some(&missing), None).is_err());
    }

    #[test]
    fn test_inline_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.group.max_threads, defaults::group::MAX_THREADS);
        assert_eq!(config.worker.max_queue_size, defaults::worker::MAX_QUEUE_SIZE);
    }

    #[test]
    fn test_validation_rejects_bad_pool_shape() {
        let err = RuntimeConfig::from_toml_str("[group]\nmin_threads = 4\nmax_threads = 2\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("min_threads"));

        assert!(RuntimeConfig::from_toml_str("[group]\nmax_threads = 0\n").is_err());
        assert!(RuntimeConfig::from_toml_str("[worker]\nmax_queue_size = 0\n").is_err());
    }

    #[test]
    fn test_toml_rendering_reloads() {
        let mut config = RuntimeConfig::default();
        config.worker.linger_ms = 42;
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("linger_ms = 42"));
        assert_eq!(RuntimeConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
