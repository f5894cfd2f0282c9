//! Checkpoint metadata and query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Globally unique checkpoint identifier (hyphenated UUIDv7).
pub type CheckpointId = String;

/// Index row describing one stored checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    pub checkpoint_id: CheckpointId,
    /// Creation time; ISO-8601 on the wire.
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub workflow_id: String,
    /// Stored size, i.e. after compression when `compressed` is set.
    pub size_bytes: u64,
    pub compressed: bool,
}

impl CheckpointMetadata {
    /// Newest-first ordering key.
    pub(crate) fn recency_key(&self) -> (DateTime<Utc>, &str) {
        (self.timestamp, self.checkpoint_id.as_str())
    }
}

/// Selects checkpoints for `list` and `prune_matching`.
///
/// `before`, `before_id` and `limit` page through results: pass the last
/// item seen to [`CheckpointFilter::after`] to get the next page. Prune
/// ignores all three.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CheckpointFilter {
    pub agent_id: Option<String>,
    pub workflow_id: Option<String>,
    /// Only checkpoints strictly older than this.
    pub before: Option<DateTime<Utc>>,
    /// Tie-breaker for `before`: checkpoints stamped exactly `before` are
    /// kept when their id sorts below this one.
    pub before_id: Option<String>,
    pub limit: Option<usize>,
}

impl CheckpointFilter {
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    pub fn for_workflow(agent_id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            workflow_id: Some(workflow_id.into()),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    /// Continue listing after `last`, the final item of the previous page.
    pub fn after(mut self, last: &CheckpointMetadata) -> Self {
        self.before = Some(last.timestamp);
        self.before_id = Some(last.checkpoint_id.clone());
        self
    }

    /// Whether `meta` is in scope (ignores paging fields).
    pub(crate) fn scope_matches(&self, meta: &CheckpointMetadata) -> bool {
        self.agent_id.as_ref().is_none_or(|a| *a == meta.agent_id)
            && self.workflow_id.as_ref().is_none_or(|w| *w == meta.workflow_id)
    }

    pub(crate) fn matches(&self, meta: &CheckpointMetadata) -> bool {
        self.scope_matches(meta) && self.is_before_cursor(meta)
    }

    fn is_before_cursor(&self, meta: &CheckpointMetadata) -> bool {
        let Some(before) = self.before else {
            return true;
        };
        match &self.before_id {
            Some(id) => meta.recency_key() < (before, id.as_str()),
            None => meta.timestamp < before,
        }
    }
}

/// Outcome of a prune pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PruneReport {
    /// Checkpoints in scope.
    pub examined: usize,
    pub removed: usize,
}

impl PruneReport {
    pub fn retained(&self) -> usize {
        self.examined - self.removed
    }
}
