//! keel.toml configuration parser.
//!
//! Every section is optional; a missing file section falls back to the
//! defaults below. Durations are written as strings ("30s", "7d") and
//! checked by [`KeelConfig::validate`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::duration::parse_duration;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KeelConfig {
    pub server: ServerConfig,
    pub breakers: BreakerConfigFile,
    pub checkpoints: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Emit JSON log lines instead of human-readable text.
    pub json_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8480,
            json_logs: false,
        }
    }
}

/// `[breakers]`: defaults plus per-dependency overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfigFile {
    pub default: BreakerDefaults,
    pub overrides: HashMap<String, BreakerOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerDefaults {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout: String,
    pub half_open_max_calls: u32,
}

impl Default for BreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: "30s".to_string(),
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BreakerOverride {
    pub failure_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
    pub timeout: Option<String>,
    pub half_open_max_calls: Option<u32>,
}

impl BreakerDefaults {
    /// The parsed `timeout`.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.timeout)
            .ok_or_else(|| ConfigError::Invalid(format!("bad breaker timeout {:?}", self.timeout)))
    }

    fn validate(&self, scope: &str) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(format!(
                "{scope}: failure_threshold must be at least 1"
            )));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::Invalid(format!(
                "{scope}: success_threshold must be at least 1"
            )));
        }
        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid(format!(
                "{scope}: half_open_max_calls must be at least 1"
            )));
        }
        if self.timeout()?.is_zero() {
            return Err(ConfigError::Invalid(format!("{scope}: timeout must be non-zero")));
        }
        Ok(())
    }
}

impl BreakerConfigFile {
    /// Resolve the effective settings for a named breaker.
    pub fn settings_for(&self, name: &str) -> BreakerDefaults {
        let mut settings = self.default.clone();
        if let Some(o) = self.overrides.get(name) {
            if let Some(v) = o.failure_threshold {
                settings.failure_threshold = v;
            }
            if let Some(v) = o.success_threshold {
                settings.success_threshold = v;
            }
            if let Some(v) = &o.timeout {
                settings.timeout = v.clone();
            }
            if let Some(v) = o.half_open_max_calls {
                settings.half_open_max_calls = v;
            }
        }
        settings
    }
}

/// `[checkpoints]`: storage location, I/O budget, and retention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Database file. Relative to the data directory when not absolute.
    pub path: PathBuf,
    /// Compress bodies unless the caller says otherwise.
    pub compress: bool,
    pub io_timeout: String,
    pub prune_interval: String,
    pub retention: RetentionConfig,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("checkpoints.redb"),
            compress: true,
            io_timeout: "5s".to_string(),
            prune_interval: "5m".to_string(),
            retention: RetentionConfig::default(),
        }
    }
}

/// `[checkpoints.retention]`. Without the table, both limits default to
/// 10,000 checkpoints and 7 days. Inside it, an omitted limit is off, so
/// `max_count = 100` alone is a count-only policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionConfig {
    pub max_count: Option<usize>,
    pub max_age: Option<String>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_count: Some(10_000),
            max_age: Some("7d".to_string()),
        }
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Result<Option<Duration>, ConfigError> {
        self.max_age
            .as_deref()
            .map(|s| {
                parse_duration(s)
                    .ok_or_else(|| ConfigError::Invalid(format!("bad retention max_age {s:?}")))
            })
            .transpose()
    }
}

impl CheckpointConfig {
    pub fn io_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.io_timeout)
            .ok_or_else(|| ConfigError::Invalid(format!("bad io_timeout {:?}", self.io_timeout)))
    }

    pub fn prune_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.prune_interval).ok_or_else(|| {
            ConfigError::Invalid(format!("bad prune_interval {:?}", self.prune_interval))
        })
    }

    /// Database path resolved against a data directory.
    pub fn resolve_path(&self, data_dir: &Path) -> PathBuf {
        if self.path.is_absolute() {
            self.path.clone()
        } else {
            data_dir.join(&self.path)
        }
    }
}

impl KeelConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: KeelConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every duration and threshold, including overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breakers.default.validate("breakers.default")?;
        for name in self.breakers.overrides.keys() {
            self.breakers
                .settings_for(name)
                .validate(&format!("breakers.overrides.{name}"))?;
        }
        if self.checkpoints.io_timeout()?.is_zero() {
            return Err(ConfigError::Invalid("checkpoints.io_timeout must be non-zero".into()));
        }
        if self.checkpoints.prune_interval()?.is_zero() {
            return Err(ConfigError::Invalid(
                "checkpoints.prune_interval must be non-zero".into(),
            ));
        }
        self.checkpoints.retention.max_age()?;
        Ok(())
    }
}
