//! Health report returned by `/api/observability/health`.

use serde::{Deserialize, Serialize};

use keel_metrics::MetricTotals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerHealth {
    pub total: usize,
    pub open: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointHealth {
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub circuit_breakers: BreakerHealth,
    pub checkpoints: CheckpointHealth,
    pub metrics: MetricTotals,
}

impl HealthReport {
    /// Derive the report; any open breaker degrades the whole substrate.
    pub fn new(
        breakers_total: usize,
        breakers_open: usize,
        checkpoints_total: u64,
        metrics: MetricTotals,
    ) -> Self {
        let degraded = breakers_open > 0;
        Self {
            status: if degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            },
            circuit_breakers: BreakerHealth {
                total: breakers_total,
                open: breakers_open,
                degraded,
            },
            checkpoints: CheckpointHealth {
                total: checkpoints_total,
            },
            metrics,
        }
    }
}
