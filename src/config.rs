//! Service configuration.
//!
//! [`ServiceConfig`] groups the encoder location, the queue's concurrency
//! limit, the reduced-tier policy limits and the cache directories. Every
//! field has a default so partial TOML files are accepted.

use crate::env;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors while loading or saving configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration for the transcode service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Delay before a task whose input probe failed is deleted
    pub probe_failure_grace_ms: u64,
    pub encoder: EncoderConfig,
    pub scheduler: SchedulerConfig,
    pub policy: PolicyConfig,
    pub storage: StorageConfig,
}

/// Where to find the encoder binary
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit path; discovered automatically when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Queue scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrent_tasks: usize,
}

/// Functional tier and the limits enforced under the reduced tier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub function_level: u32,
    /// Levels at or above this are unrestricted
    pub unrestricted_level: u32,
    pub rate_value_min: f64,
    pub rate_value_max: f64,
    /// Ceiling for encoded media time and for elapsed running time, in seconds
    pub duration_ceiling_secs: f64,
}

/// Cache directories for remote tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub download_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 2,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            function_level: 20,
            unrestricted_level: 50,
            rate_value_min: 0.25,
            rate_value_max: 0.75,
            duration_ceiling_secs: 671.0,
        }
    }
}

impl PolicyConfig {
    /// Whether the reduced-tier limits apply
    pub fn is_restricted(&self) -> bool {
        self.function_level < self.unrestricted_level
    }

    /// Clamp a fractional rate value into the allowed range.
    ///
    /// Returns `None` when the value is already inside the range.
    pub fn clamp_rate_value(&self, value: f64) -> Option<f64> {
        if value > self.rate_value_max {
            Some(self.rate_value_max)
        } else if value < self.rate_value_min {
            Some(self.rate_value_min)
        } else {
            None
        }
    }

    /// Whether either the encoded media time or the running time is past the ceiling
    pub fn exceeds_ceiling(&self, media_secs: f64, running_secs: f64) -> bool {
        media_secs > self.duration_ceiling_secs || running_secs > self.duration_ceiling_secs
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: env::default_upload_dir(),
            download_dir: env::default_download_dir(),
        }
    }
}

impl ServiceConfig {
    /// Concurrency limit, never below one
    pub fn concurrency_limit(&self) -> usize {
        self.scheduler.max_concurrent_tasks.max(1)
    }

    pub fn probe_failure_grace(&self) -> Duration {
        Duration::from_millis(self.probe_failure_grace_ms)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Save to TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            probe_failure_grace_ms: 100,
            encoder: EncoderConfig::default(),
            scheduler: SchedulerConfig::default(),
            policy: PolicyConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
