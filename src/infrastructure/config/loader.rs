use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid partitions_per_topic: {0}. Must be at least 1")]
    InvalidPartitions(u32),

    #[error("Consumer group_id cannot be empty")]
    EmptyGroupId,

    #[error("Invalid max_poll_records: {0}. Must be at least 1")]
    InvalidMaxPollRecords(usize),

    #[error("Invalid {0}: must be greater than 0")]
    ZeroTimeout(&'static str),

    #[error("Invalid failure_threshold: {0}. Must be at least 1")]
    InvalidFailureThreshold(u32),

    #[error(
        "Invalid backoff configuration: base_delay_ms ({0}) must not exceed max_delay_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidLogRotation(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .campus/config.yaml
    /// 3. .campus/local.yaml (optional local overrides)
    /// 4. Environment variables (CAMPUS_* prefix, `__` separates sections)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`load`](Self::load), with `.campus/` resolved under `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(".campus");
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed("CAMPUS_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load defaults plus a single YAML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.broker.partitions_per_topic == 0 {
            return Err(ConfigError::InvalidPartitions(0));
        }
        if config.broker.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("broker.connect_timeout_ms"));
        }
        if config.publisher.ack_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("publisher.ack_timeout_ms"));
        }

        let consumer = &config.consumer;
        if consumer.group_id.trim().is_empty() {
            return Err(ConfigError::EmptyGroupId);
        }
        if consumer.max_poll_records == 0 {
            return Err(ConfigError::InvalidMaxPollRecords(0));
        }
        if consumer.poll_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("consumer.poll_timeout_ms"));
        }
        if consumer.handler_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("consumer.handler_timeout_ms"));
        }

        if config.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold(0));
        }

        if config.retry.base_delay_ms > config.retry.max_delay_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.base_delay_ms,
                config.retry.max_delay_ms,
            ));
        }

        if config.health.interval_secs == 0 {
            return Err(ConfigError::ZeroTimeout("health.interval_secs"));
        }
        if config.health.probe_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("health.probe_timeout_ms"));
        }
        if config.shutdown.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("shutdown.timeout_secs"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidLogRotation(
                config.logging.rotation.clone(),
            ));
        }

        Ok(())
    }
}
