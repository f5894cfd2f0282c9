//! ObservabilityService — single entry point over the substrate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use keel_breaker::{BreakerRegistry, BreakerSnapshot, CallError, CircuitBreaker};
use keel_checkpoint::{
    CheckpointError, CheckpointFilter, CheckpointMetadata, CheckpointResult, CheckpointStore,
};
use keel_core::KeelConfig;
use keel_metrics::{MetricsRegistry, MetricsSnapshot};

use crate::error::ServiceResult;
use crate::health::HealthReport;

/// Breaker guarding checkpoint storage I/O.
pub const CHECKPOINT_BREAKER: &str = "checkpoint_store";

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Aggregates metrics, breakers, and checkpoints for callers and dashboards.
#[derive(Debug)]
pub struct ObservabilityService {
    metrics: Arc<MetricsRegistry>,
    breakers: Arc<BreakerRegistry>,
    checkpoints: CheckpointStore,
    io_timeout: Duration,
    compress: bool,
}

impl ObservabilityService {
    pub fn new(
        metrics: Arc<MetricsRegistry>,
        breakers: Arc<BreakerRegistry>,
        checkpoints: CheckpointStore,
    ) -> Self {
        Self {
            metrics,
            breakers,
            checkpoints,
            io_timeout: DEFAULT_IO_TIMEOUT,
            compress: true,
        }
    }

    /// Assemble a service from keel.toml settings around an opened store.
    pub fn from_config(config: &KeelConfig, checkpoints: CheckpointStore) -> ServiceResult<Self> {
        let metrics = Arc::new(MetricsRegistry::new());
        let breakers = Arc::new(BreakerRegistry::from_config(
            Arc::clone(&metrics),
            &config.breakers,
        )?);
        let io_timeout = config.checkpoints.io_timeout()?;
        Ok(Self::new(metrics, breakers, checkpoints)
            .with_io_timeout(io_timeout)
            .with_compression(config.checkpoints.compress))
    }

    /// Upper bound on a single guarded checkpoint operation.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Whether [`save_checkpoint`](Self::save_checkpoint) compresses bodies.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// The breaker for a named dependency, created on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(name)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn get_circuit_breakers(&self) -> BTreeMap<String, BreakerSnapshot> {
        self.breakers.snapshot_all()
    }

    pub fn get_checkpoints(
        &self,
        filter: &CheckpointFilter,
    ) -> CheckpointResult<Vec<CheckpointMetadata>> {
        self.checkpoints.list(filter)
    }

    pub fn get_checkpoint(&self, checkpoint_id: &str) -> CheckpointResult<CheckpointMetadata> {
        self.checkpoints.metadata(checkpoint_id)
    }

    /// Health summary. Storage trouble shows up as a zero checkpoint total
    /// and a warning, never as an error.
    pub fn get_health(&self) -> HealthReport {
        let checkpoints_total = self.checkpoints.count().unwrap_or_else(|e| {
            warn!(error = %e, "checkpoint count unavailable for health report");
            0
        });
        HealthReport::new(
            self.breakers.len(),
            self.breakers.open_count(),
            checkpoints_total,
            self.metrics.totals(),
        )
    }

    // ── Guarded checkpoint I/O ─────────────────────────────────────

    /// Save a checkpoint using the service's compression setting.
    pub async fn save_checkpoint(
        &self,
        agent_id: &str,
        workflow_id: &str,
        payload: Vec<u8>,
    ) -> CheckpointResult<CheckpointMetadata> {
        self.save_checkpoint_with(agent_id, workflow_id, payload, self.compress)
            .await
    }

    /// Save a checkpoint through the storage breaker and I/O timeout.
    pub async fn save_checkpoint_with(
        &self,
        agent_id: &str,
        workflow_id: &str,
        payload: Vec<u8>,
        compress: bool,
    ) -> CheckpointResult<CheckpointMetadata> {
        let started = Instant::now();
        let agent = agent_id.to_string();
        let workflow = workflow_id.to_string();
        let meta = self
            .guarded("save", move |store| {
                store.save(&agent, &workflow, &payload, compress)
            })
            .await?;

        self.metrics.incr("checkpoint.saved");
        let _ = self
            .metrics
            .observe_histogram("checkpoint.size_bytes", meta.size_bytes as f64);
        let _ = self.metrics.observe_histogram(
            "checkpoint.save_ms",
            started.elapsed().as_secs_f64() * 1000.0,
        );
        Ok(meta)
    }

    /// Load a checkpoint payload through the storage breaker and I/O timeout.
    pub async fn load_checkpoint(&self, checkpoint_id: &str) -> CheckpointResult<Vec<u8>> {
        let id = checkpoint_id.to_string();
        let payload = self.guarded("load", move |store| store.load(&id)).await?;
        self.metrics.incr("checkpoint.loaded");
        Ok(payload)
    }

    /// Latest checkpoint for an (agent, workflow) pair, for crash recovery.
    pub async fn recover(
        &self,
        agent_id: &str,
        workflow_id: &str,
    ) -> CheckpointResult<Option<(CheckpointMetadata, Vec<u8>)>> {
        let agent = agent_id.to_string();
        let workflow = workflow_id.to_string();
        let found = self
            .guarded("recover", move |store| store.load_latest(&agent, &workflow))
            .await?;
        if found.is_some() {
            self.metrics.incr("checkpoint.loaded");
        }
        Ok(found)
    }

    /// Run `op` on the blocking pool under the I/O timeout and the
    /// checkpoint breaker. Only `StorageUnavailable` counts against the
    /// breaker.
    async fn guarded<T, F>(&self, op: &'static str, f: F) -> CheckpointResult<T>
    where
        T: Send + 'static,
        F: FnOnce(CheckpointStore) -> CheckpointResult<T> + Send + 'static,
    {
        let breaker = self.breakers.get_or_create(CHECKPOINT_BREAKER);
        let store = self.checkpoints.clone();
        let timeout = self.io_timeout;

        let io = async move {
            match tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || f(store))).await
            {
                Ok(Ok(result)) => result,
                Ok(Err(join)) => Err(CheckpointError::StorageUnavailable(format!(
                    "checkpoint {op} task failed: {join}"
                ))),
                Err(_) => Err(CheckpointError::StorageUnavailable(format!(
                    "checkpoint {op} timed out after {timeout:?}"
                ))),
            }
        };

        match breaker.call_with(io, CheckpointError::is_storage).await {
            Ok(value) => Ok(value),
            Err(CallError::Rejected { breaker }) => {
                self.metrics.incr("checkpoint.rejected");
                debug!(%breaker, op, "checkpoint call short-circuited");
                Err(CheckpointError::StorageUnavailable(format!(
                    "circuit breaker {breaker} is open"
                )))
            }
            Err(CallError::Inner(e)) => {
                if e.is_storage() {
                    self.metrics.incr("checkpoint.failures");
                    warn!(error = %e, op, "checkpoint storage failure");
                }
                Err(e)
            }
        }
    }
}
