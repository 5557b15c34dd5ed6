//! Configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `REPLYFS_` (nested keys separated by
//! `__`, e.g. `REPLYFS_LIMITS__TOTAL_RATE=50`).

use crate::codec;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest number of tokens a single remote operation requests from the pool:
/// a tail append with its undo (get, update, header update, restore).
pub const MAX_TOKENS_PER_CALL: u32 = 4;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Maximum record content size accepted by the store, in bytes
    pub max_record_size: usize,
    /// Lanes provisioned when file options leave the count at 0
    pub default_lanes: usize,
    /// Page size for thread and record listings
    pub page_size: usize,
    pub limits: LimitConfig,
    pub retry: RetryConfig,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_record_size: 4096,
            default_lanes: 512,
            page_size: 100,
            limits: LimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Request quotas, in calls per second
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    pub per_credential_rate: f64,
    pub per_credential_burst: u32,
    pub total_rate: f64,
    pub total_burst: u32,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            per_credential_rate: 10.0, // 1000 calls per 100 seconds
            per_credential_burst: 10,
            total_rate: 100.0, // 10000 calls per 100 seconds
            total_burst: 10,
        }
    }
}

/// Exponential backoff settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub randomization_factor: f64,
    /// Total time budget for one retried call; 0 disables the bound
    pub max_elapsed_ms: u64,
    /// Retry not-found responses, which the store returns transiently while
    /// new objects propagate
    pub retry_not_found: bool,
    /// Retry errors that did not come from the store and carry no known class
    pub retry_unclassified: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            max_interval_ms: 60_000,
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_elapsed_ms: 15 * 60 * 1000,
            retry_not_found: true,
            retry_unclassified: false,
        }
    }
}

impl RetryConfig {
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        (self.max_elapsed_ms > 0).then(|| Duration::from_millis(self.max_elapsed_ms))
    }
}

impl FsConfig {
    /// Load configuration from defaults, an optional TOML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&FsConfig::default())
            .map_err(|e| Error::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("REPLYFS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: FsConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::SerializationError(e.to_string()))
    }

    /// Usable payload bytes per record
    pub fn effective_record_size(&self) -> usize {
        codec::effective_record_size(self.max_record_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_record_size <= codec::OVERHEAD {
            return Err(Error::Config(format!(
                "max_record_size must exceed {} bytes",
                codec::OVERHEAD
            )));
        }
        if self.default_lanes == 0 {
            return Err(Error::Config("default_lanes must be at least 1".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::Config("page_size must be at least 1".to_string()));
        }
        let limits = &self.limits;
        if !(limits.per_credential_rate > 0.0 && limits.total_rate > 0.0) {
            return Err(Error::Config("rates must be positive".to_string()));
        }
        if limits.per_credential_burst < MAX_TOKENS_PER_CALL || limits.total_burst < MAX_TOKENS_PER_CALL {
            return Err(Error::Config(format!(
                "bursts must allow at least {} tokens",
                MAX_TOKENS_PER_CALL
            )));
        }
        if self.retry.multiplier < 1.0 || !(0.0..=1.0).contains(&self.retry.randomization_factor) {
            return Err(Error::Config(
                "retry multiplier must be >= 1 and randomization factor within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = FsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_record_size(), 4094);
        assert_eq!(config.retry.max_elapsed(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "default_lanes = 8\n\n[limits]\ntotal_rate = 25.0\n\n[retry]\nmax_elapsed_ms = 0\n"
        )
        .unwrap();

        let config = FsConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.default_lanes, 8);
        assert_eq!(config.limits.total_rate, 25.0);
        assert_eq!(config.limits.per_credential_rate, 10.0);
        assert_eq!(config.retry.max_elapsed(), None);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = FsConfig::default();
        config.page_size = 20;
        let rendered = config.to_toml().unwrap();
        let parsed: FsConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_validate_rejects_small_bursts() {
        let mut config = FsConfig::default();
        config.limits.total_burst = 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = FsConfig::default();
        config.limits.per_credential_burst = MAX_TOKENS_PER_CALL - 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        config.limits.per_credential_burst = MAX_TOKENS_PER_CALL;
        assert!(config.validate().is_ok());

        let mut config = FsConfig::default();
        config.max_record_size = 2;
        assert!(config.validate().is_err());
    }
}
