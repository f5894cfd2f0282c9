//! Breaker thresholds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use keel_core::config::BreakerDefaults;

use crate::error::{BreakerError, BreakerResult};

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures in `closed` before tripping.
    pub failure_threshold: u32,
    /// Successes in `half_open` before closing.
    pub success_threshold: u32,
    /// How long `open` lasts before a trial call is allowed. Seconds on the wire.
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Concurrent trial calls allowed in `half_open`.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl BreakerConfig {
    pub fn new(failure_threshold: u32, success_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            timeout,
            ..Self::default()
        }
    }

    pub fn with_half_open_max_calls(mut self, max: u32) -> Self {
        self.half_open_max_calls = max;
        self
    }

    /// Build from the `[breakers]` section of keel.toml.
    pub fn from_settings(name: &str, settings: &BreakerDefaults) -> BreakerResult<Self> {
        let timeout = settings.timeout().map_err(|e| BreakerError::InvalidArgument {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        let config = Self {
            failure_threshold: settings.failure_threshold,
            success_threshold: settings.success_threshold,
            timeout,
            half_open_max_calls: settings.half_open_max_calls,
        };
        config.validate(name)?;
        Ok(config)
    }

    pub fn validate(&self, name: &str) -> BreakerResult<()> {
        let invalid = |reason: &str| BreakerError::InvalidArgument {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if self.failure_threshold == 0 {
            return Err(invalid("failure_threshold must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(invalid("success_threshold must be at least 1"));
        }
        if self.half_open_max_calls == 0 {
            return Err(invalid("half_open_max_calls must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("timeout must be non-zero"));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_settings_parses_timeout() {
        let settings = BreakerDefaults {
            failure_threshold: 3,
            success_threshold: 2,
            timeout: "45s".to_string(),
            half_open_max_calls: 1,
        };
        let config = BreakerConfig::from_settings("db", &settings).unwrap();
        assert_eq!(config.timeout, Duration::from_secs(45));
        assert_eq!(config.failure_threshold, 3);
    }

    #[test]
    fn zero_thresholds_are_invalid() {
        let config = BreakerConfig::new(0, 1, Duration::from_secs(1));
        assert!(config.validate("x").is_err());
        let config = BreakerConfig::new(1, 0, Duration::from_secs(1));
        assert!(config.validate("x").is_err());
        let config = BreakerConfig::new(1, 1, Duration::ZERO);
        assert!(config.validate("x").is_err());
        let config = BreakerConfig::new(1, 1, Duration::from_secs(1)).with_half_open_max_calls(0);
        assert!(config.validate("x").is_err());
    }

    #[test]
    fn timeout_serializes_as_seconds() {
        let config = BreakerConfig::new(3, 2, Duration::from_secs(30));
        let json = serde_json::to_value(config).unwrap();
        assert_eq!(json["timeout"], 30.0);
        let back: BreakerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
