//! Lazily populated set of named breakers.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use keel_core::config::BreakerConfigFile;
use keel_core::{SharedClock, SystemClock};
use keel_metrics::MetricsRegistry;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::BreakerConfig;
use crate::error::BreakerResult;
use crate::state::BreakerStatus;

/// Holds exactly one [`CircuitBreaker`] per dependency name.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    defaults: BreakerConfig,
    overrides: HashMap<String, BreakerConfig>,
    metrics: Arc<MetricsRegistry>,
    clock: SharedClock,
}

impl BreakerRegistry {
    pub fn new(metrics: Arc<MetricsRegistry>, defaults: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            defaults,
            overrides: HashMap::new(),
            metrics,
            clock: SystemClock::shared(),
        }
    }

    /// Build from the `[breakers]` section of keel.toml.
    pub fn from_config(
        metrics: Arc<MetricsRegistry>,
        file: &BreakerConfigFile,
    ) -> BreakerResult<Self> {
        let defaults = BreakerConfig::from_settings("default", &file.default)?;
        let mut registry = Self::new(metrics, defaults);
        for name in file.overrides.keys() {
            let config = BreakerConfig::from_settings(name, &file.settings_for(name))?;
            registry.overrides.insert(name.clone(), config);
        }
        Ok(registry)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Use `config` for the breaker called `name` instead of the defaults.
    pub fn with_override(mut self, name: &str, config: BreakerConfig) -> BreakerResult<Self> {
        config.validate(name)?;
        self.overrides.insert(name.to_string(), config);
        Ok(self)
    }

    /// The config a breaker with this name gets.
    pub fn config_for(&self, name: &str) -> BreakerConfig {
        self.overrides.get(name).copied().unwrap_or(self.defaults)
    }

    /// Fetch the breaker for `name`, creating it (closed) on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let (breaker, created) = {
            let mut breakers = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
            match breakers.get(name) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let breaker = Arc::new(CircuitBreaker::new(
                        name,
                        self.config_for(name),
                        Arc::clone(&self.metrics),
                        Arc::clone(&self.clock),
                    ));
                    breakers.insert(name.to_string(), Arc::clone(&breaker));
                    (breaker, true)
                }
            }
        };

        if created {
            breaker.publish_state();
            debug!(breaker = %name, config = ?breaker.config(), "circuit breaker created");
        }
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn all(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Snapshot every breaker, keyed by name.
    pub fn snapshot_all(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.all()
            .into_iter()
            .map(|b| (b.name().to_string(), b.snapshot()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.breakers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of breakers currently open.
    pub fn open_count(&self) -> usize {
        self.all()
            .iter()
            .filter(|b| b.status() == BreakerStatus::Open)
            .count()
    }
}
