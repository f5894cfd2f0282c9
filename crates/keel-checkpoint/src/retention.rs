//! Retention policy and the background prune loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{error, info};

use keel_core::config::RetentionConfig;

use crate::error::{CheckpointError, CheckpointResult};
use crate::store::CheckpointStore;
use crate::types::PruneReport;

/// Which checkpoints survive a prune. Both limits apply when both are set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep at most this many, newest first.
    pub max_count: Option<usize>,
    /// Drop anything older than this.
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn keep_last(count: usize) -> Self {
        Self {
            max_count: Some(count),
            max_age: None,
        }
    }

    pub fn max_age(age: Duration) -> Self {
        Self {
            max_count: None,
            max_age: Some(age),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_count.is_none() && self.max_age.is_none()
    }

    pub fn from_config(config: &RetentionConfig) -> CheckpointResult<Self> {
        let max_age = config
            .max_age()
            .map_err(|e| CheckpointError::InvalidArgument(e.to_string()))?;
        Ok(Self {
            max_count: config.max_count,
            max_age,
        })
    }
}

impl CheckpointStore {
    /// Prune on a fixed interval until shutdown, with a final pass on exit.
    ///
    /// Storage errors are logged and the loop keeps going.
    pub async fn run_retention(
        &self,
        policy: RetentionPolicy,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        if policy.is_unbounded() {
            info!("checkpoint retention disabled");
            return;
        }
        info!(
            interval_secs = interval.as_secs(),
            max_count = ?policy.max_count,
            max_age_secs = ?policy.max_age.map(|a| a.as_secs()),
            "checkpoint retention started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.prune_logged(policy, "interval").await;
                }
                _ = shutdown.changed() => {
                    info!("checkpoint retention shutting down");
                    self.prune_logged(policy, "shutdown").await;
                    break;
                }
            }
        }
    }

    async fn prune_logged(
        &self,
        policy: RetentionPolicy,
        pass: &'static str,
    ) -> Option<PruneReport> {
        match self.prune_blocking(policy).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, pass, "checkpoint prune failed");
                None
            }
        }
    }

    async fn prune_blocking(&self, policy: RetentionPolicy) -> CheckpointResult<PruneReport> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.prune(&policy))
            .await
            .map_err(|e| CheckpointError::StorageUnavailable(format!("prune task: {e}")))?
    }
}
