//! CheckpointStore — redb-backed checkpoint persistence.
//!
//! Metadata and body rows for a checkpoint are written and removed in the
//! same write transaction. redb gives readers a consistent snapshot, so a
//! concurrent `load` or `list` sees a checkpoint either whole or not at
//! all, even while `prune` is deleting it.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata};
use tracing::{debug, info};
use uuid::Uuid;

use keel_core::{SharedClock, SystemClock};

use crate::codec;
use crate::error::{CheckpointError, CheckpointResult};
use crate::retention::RetentionPolicy;
use crate::tables::*;
use crate::types::*;

/// Map a redb failure to `StorageUnavailable`, tagged with the operation.
macro_rules! storage_err {
    ($op:literal) => {
        |e| CheckpointError::StorageUnavailable(format!(concat!($op, ": {}"), e))
    };
}

/// Thread-safe checkpoint store backed by redb.
#[derive(Clone)]
pub struct CheckpointStore {
    db: Arc<Database>,
    clock: SharedClock,
}

impl std::fmt::Debug for CheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStore").finish_non_exhaustive()
    }
}

impl CheckpointStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> CheckpointResult<Self> {
        let db = Database::create(path).map_err(storage_err!("open"))?;
        let store = Self::from_db(db)?;
        debug!(?path, "checkpoint store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> CheckpointResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(storage_err!("open"))?;
        let store = Self::from_db(db)?;
        debug!("in-memory checkpoint store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> CheckpointResult<Self> {
        let store = Self {
            db: Arc::new(db),
            clock: SystemClock::shared(),
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Stamp checkpoints (and measure ages) with this clock.
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    fn ensure_tables(&self) -> CheckpointResult<()> {
        let txn = self.db.begin_write().map_err(storage_err!("begin"))?;
        txn.open_table(CHECKPOINT_META).map_err(storage_err!("table"))?;
        txn.open_table(CHECKPOINT_BODY).map_err(storage_err!("table"))?;
        txn.commit().map_err(storage_err!("commit"))?;
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.now())
    }

    /// Persist a new checkpoint and return its metadata.
    pub fn save(
        &self,
        agent_id: &str,
        workflow_id: &str,
        payload: &[u8],
        compress: bool,
    ) -> CheckpointResult<CheckpointMetadata> {
        if agent_id.is_empty() || workflow_id.is_empty() {
            return Err(CheckpointError::InvalidArgument(
                "agent_id and workflow_id must be non-empty".to_string(),
            ));
        }

        let (body, compressed) = codec::encode(payload, compress);
        let meta = CheckpointMetadata {
            checkpoint_id: Uuid::now_v7().to_string(),
            timestamp: self.now(),
            agent_id: agent_id.to_string(),
            workflow_id: workflow_id.to_string(),
            size_bytes: body.len() as u64,
            compressed,
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| CheckpointError::InvalidArgument(format!("metadata: {e}")))?;
        let key = meta.checkpoint_id.as_str();

        let txn = self.db.begin_write().map_err(storage_err!("begin"))?;
        let collided = {
            let mut meta_table = txn.open_table(CHECKPOINT_META).map_err(storage_err!("table"))?;
            let mut body_table = txn.open_table(CHECKPOINT_BODY).map_err(storage_err!("table"))?;
            if meta_table.get(key).map_err(storage_err!("read"))?.is_some() {
                true
            } else {
                meta_table
                    .insert(key, meta_json.as_slice())
                    .map_err(storage_err!("write"))?;
                body_table
                    .insert(key, body.as_slice())
                    .map_err(storage_err!("write"))?;
                false
            }
        };
        if collided {
            txn.abort().map_err(storage_err!("abort"))?;
            return Err(CheckpointError::AlreadyExists(meta.checkpoint_id));
        }
        txn.commit().map_err(storage_err!("commit"))?;

        debug!(
            checkpoint_id = %meta.checkpoint_id,
            agent_id,
            workflow_id,
            size_bytes = meta.size_bytes,
            raw_bytes = payload.len(),
            compressed,
            "checkpoint saved"
        );
        Ok(meta)
    }

    /// Load a checkpoint's payload, decompressing if needed.
    pub fn load(&self, checkpoint_id: &str) -> CheckpointResult<Vec<u8>> {
        let (meta, body) = self.read_entry(checkpoint_id)?;
        codec::decode(&body, meta.compressed)
    }

    /// Metadata for one checkpoint.
    pub fn metadata(&self, checkpoint_id: &str) -> CheckpointResult<CheckpointMetadata> {
        let txn = self.db.begin_read().map_err(storage_err!("begin"))?;
        let table = txn.open_table(CHECKPOINT_META).map_err(storage_err!("table"))?;
        match table.get(checkpoint_id).map_err(storage_err!("read"))? {
            Some(guard) => decode_meta(guard.value()),
            None => Err(CheckpointError::NotFound(checkpoint_id.to_string())),
        }
    }

    /// Read metadata and stored body from one snapshot.
    fn read_entry(&self, checkpoint_id: &str) -> CheckpointResult<(CheckpointMetadata, Vec<u8>)> {
        let txn = self.db.begin_read().map_err(storage_err!("begin"))?;
        let meta_table = txn.open_table(CHECKPOINT_META).map_err(storage_err!("table"))?;
        let meta = match meta_table.get(checkpoint_id).map_err(storage_err!("read"))? {
            Some(guard) => decode_meta(guard.value())?,
            None => return Err(CheckpointError::NotFound(checkpoint_id.to_string())),
        };
        let body_table = txn.open_table(CHECKPOINT_BODY).map_err(storage_err!("table"))?;
        let body = match body_table.get(checkpoint_id).map_err(storage_err!("read"))? {
            Some(guard) => guard.value().to_vec(),
            None => {
                return Err(CheckpointError::Corrupt(format!(
                    "{checkpoint_id}: metadata without body"
                )));
            }
        };
        Ok((meta, body))
    }

    /// List checkpoints matching `filter`, most recent first.
    pub fn list(&self, filter: &CheckpointFilter) -> CheckpointResult<Vec<CheckpointMetadata>> {
        let txn = self.db.begin_read().map_err(storage_err!("begin"))?;
        let table = txn.open_table(CHECKPOINT_META).map_err(storage_err!("table"))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(storage_err!("read"))? {
            let (_, value) = entry.map_err(storage_err!("read"))?;
            let meta = decode_meta(value.value())?;
            if filter.matches(&meta) {
                results.push(meta);
            }
        }
        sort_newest_first(&mut results);
        if let Some(limit) = filter.limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    /// Most recent checkpoint for an (agent, workflow) pair.
    pub fn latest(
        &self,
        agent_id: &str,
        workflow_id: &str,
    ) -> CheckpointResult<Option<CheckpointMetadata>> {
        let filter = CheckpointFilter::for_workflow(agent_id, workflow_id).with_limit(1);
        Ok(self.list(&filter)?.into_iter().next())
    }

    /// Load the most recent checkpoint for recovery.
    pub fn load_latest(
        &self,
        agent_id: &str,
        workflow_id: &str,
    ) -> CheckpointResult<Option<(CheckpointMetadata, Vec<u8>)>> {
        let Some(meta) = self.latest(agent_id, workflow_id)? else {
            return Ok(None);
        };
        let payload = self.load(&meta.checkpoint_id)?;
        Ok(Some((meta, payload)))
    }

    /// Total number of stored checkpoints.
    pub fn count(&self) -> CheckpointResult<u64> {
        let txn = self.db.begin_read().map_err(storage_err!("begin"))?;
        let table = txn.open_table(CHECKPOINT_META).map_err(storage_err!("table"))?;
        table.len().map_err(storage_err!("read"))
    }

    /// Apply a retention policy across the whole store.
    pub fn prune(&self, policy: &RetentionPolicy) -> CheckpointResult<PruneReport> {
        self.prune_matching(&CheckpointFilter::default(), policy)
    }

    /// Apply a retention policy to the checkpoints selected by `filter`.
    ///
    /// The newest `max_count` in scope are kept, and of those, any older
    /// than `max_age` are dropped too. Selection and deletion happen in one
    /// write transaction.
    pub fn prune_matching(
        &self,
        filter: &CheckpointFilter,
        policy: &RetentionPolicy,
    ) -> CheckpointResult<PruneReport> {
        if policy.is_unbounded() {
            let examined = self.list(&CheckpointFilter {
                before: None,
                before_id: None,
                limit: None,
                ..filter.clone()
            })?;
            return Ok(PruneReport {
                examined: examined.len(),
                removed: 0,
            });
        }

        let cutoff = policy
            .max_age
            .and_then(|age| TimeDelta::from_std(age).ok())
            .and_then(|age| self.now().checked_sub_signed(age));

        let txn = self.db.begin_write().map_err(storage_err!("begin"))?;
        let report = {
            let mut meta_table = txn.open_table(CHECKPOINT_META).map_err(storage_err!("table"))?;
            let mut body_table = txn.open_table(CHECKPOINT_BODY).map_err(storage_err!("table"))?;

            let mut in_scope = Vec::new();
            for entry in meta_table.iter().map_err(storage_err!("read"))? {
                let (_, value) = entry.map_err(storage_err!("read"))?;
                let meta = decode_meta(value.value())?;
                if filter.scope_matches(&meta) {
                    in_scope.push(meta);
                }
            }
            sort_newest_first(&mut in_scope);

            let keep = policy.max_count.unwrap_or(usize::MAX);
            let victims: Vec<&CheckpointMetadata> = in_scope
                .iter()
                .enumerate()
                .filter(|(rank, meta)| *rank >= keep || cutoff.is_some_and(|c| meta.timestamp < c))
                .map(|(_, meta)| meta)
                .collect();

            for meta in &victims {
                meta_table
                    .remove(meta.checkpoint_id.as_str())
                    .map_err(storage_err!("delete"))?;
                body_table
                    .remove(meta.checkpoint_id.as_str())
                    .map_err(storage_err!("delete"))?;
            }

            PruneReport {
                examined: in_scope.len(),
                removed: victims.len(),
            }
        };
        txn.commit().map_err(storage_err!("commit"))?;

        if report.removed > 0 {
            info!(
                examined = report.examined,
                removed = report.removed,
                "checkpoints pruned"
            );
        }
        Ok(report)
    }
}

fn decode_meta(bytes: &[u8]) -> CheckpointResult<CheckpointMetadata> {
    serde_json::from_slice(bytes).map_err(|e| CheckpointError::Corrupt(format!("metadata: {e}")))
}

fn sort_newest_first(items: &mut [CheckpointMetadata]) {
    items.sort_by(|a, b| b.recency_key().cmp(&a.recency_key()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::ManualClock;
    use std::collections::HashSet;
    use std::time::Duration;

    fn store_with_clock() -> (CheckpointStore, Arc<ManualClock>) {
        let clock = ManualClock::at_unix(1_700_000_000);
        let store = CheckpointStore::open_in_memory()
            .unwrap()
            .with_clock(clock.clone());
        (store, clock)
    }

    /// Save `n` checkpoints one second apart and return their ids, oldest first.
    fn save_series(
        store: &CheckpointStore,
        clock: &ManualClock,
        agent: &str,
        workflow: &str,
        n: usize,
    ) -> Vec<String> {
        (0..n)
            .map(|i| {
                clock.advance(Duration::from_secs(1));
                store
                    .save(agent, workflow, format!("step-{i}").as_bytes(), false)
                    .unwrap()
                    .checkpoint_id
            })
            .collect()
    }

    // ── Save / load ────────────────────────────────────────────────

    #[test]
    fn save_and_load_raw() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let meta = store.save("agent-1", "wf-1", b"{\"step\":3}", false).unwrap();

        assert!(!meta.compressed);
        assert_eq!(meta.size_bytes, 10);
        assert_eq!(store.load(&meta.checkpoint_id).unwrap(), b"{\"step\":3}");
    }

    #[test]
    fn compressed_round_trip_empty_and_large() {
        let store = CheckpointStore::open_in_memory().unwrap();

        let empty = store.save("a", "w", b"", true).unwrap();
        assert_eq!(store.load(&empty.checkpoint_id).unwrap(), Vec::<u8>::new());

        // > 1 MiB, mixed content.
        let large: Vec<u8> = (0..1_500_000u32)
            .map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8 ^ (i % 7) as u8)
            .collect();
        let meta = store.save("a", "w", &large, true).unwrap();
        assert!(meta.compressed);
        assert_eq!(store.load(&meta.checkpoint_id).unwrap(), large);
    }

    #[test]
    fn compressed_size_reflects_stored_bytes() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let payload = b"agent memory ".repeat(10_000);
        let meta = store.save("a", "w", &payload, true).unwrap();
        assert!(meta.compressed);
        assert!(meta.size_bytes < payload.len() as u64);
    }

    #[test]
    fn load_unknown_is_not_found() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let err = store.load("0190b8e0-0000-7000-8000-000000000000").unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
        assert!(matches!(store.metadata("nope"), Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn empty_ids_rejected() {
        let store = CheckpointStore::open_in_memory().unwrap();
        assert!(matches!(
            store.save("", "wf", b"x", false),
            Err(CheckpointError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.save("agent", "", b"x", false),
            Err(CheckpointError::InvalidArgument(_))
        ));
    }

    #[test]
    fn concurrent_saves_get_distinct_ids() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let ids: Vec<String> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let store = store.clone();
                    s.spawn(move || {
                        (0..25)
                            .map(|i| {
                                store
                                    .save("agent", "wf", format!("{t}-{i}").as_bytes(), i % 2 == 0)
                                    .unwrap()
                                    .checkpoint_id
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<&String> = ids.iter().collect();
        assert_eq!(unique.len(), 200);
        assert_eq!(store.count().unwrap(), 200);
    }

    // ── Listing ────────────────────────────────────────────────────

    #[test]
    fn list_newest_first_with_filters() {
        let (store, clock) = store_with_clock();
        let a1 = save_series(&store, &clock, "agent-a", "wf-1", 3);
        let _a2 = save_series(&store, &clock, "agent-a", "wf-2", 2);
        let _b1 = save_series(&store, &clock, "agent-b", "wf-1", 1);

        let all = store.list(&CheckpointFilter::default()).unwrap();
        assert_eq!(all.len(), 6);
        assert!(all.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));

        let agent_a = store.list(&CheckpointFilter::for_agent("agent-a")).unwrap();
        assert_eq!(agent_a.len(), 5);

        let wf1 = store
            .list(&CheckpointFilter::for_workflow("agent-a", "wf-1"))
            .unwrap();
        let ids: Vec<&str> = wf1.iter().map(|m| m.checkpoint_id.as_str()).collect();
        assert_eq!(ids, vec![a1[2].as_str(), a1[1].as_str(), a1[0].as_str()]);

        let by_workflow = CheckpointFilter {
            workflow_id: Some("wf-1".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list(&by_workflow).unwrap().len(), 4);
    }

    #[test]
    fn list_pages_by_timestamp() {
        let (store, clock) = store_with_clock();
        save_series(&store, &clock, "agent", "wf", 5);

        let page1 = store
            .list(&CheckpointFilter::default().with_limit(2))
            .unwrap();
        assert_eq!(page1.len(), 2);

        let page2 = store
            .list(
                &CheckpointFilter::default()
                    .with_limit(2)
                    .with_before(page1[1].timestamp),
            )
            .unwrap();
        assert_eq!(page2.len(), 2);
        assert!(page2[0].timestamp < page1[1].timestamp);

        let page3 = store
            .list(
                &CheckpointFilter::default()
                    .with_limit(2)
                    .with_before(page2[1].timestamp),
            )
            .unwrap();
        assert_eq!(page3.len(), 1);
    }

    #[test]
    fn list_pages_across_equal_timestamps() {
        let (store, _clock) = store_with_clock();
        let mut saved: Vec<String> = (0..5)
            .map(|_| store.save("agent", "wf", b"s", false).unwrap().checkpoint_id)
            .collect();

        let mut seen = Vec::new();
        let mut filter = CheckpointFilter::default().with_limit(2);
        loop {
            let page = store.list(&filter).unwrap();
            let Some(last) = page.last() else { break };
            filter = filter.after(last);
            seen.extend(page.iter().map(|m| m.checkpoint_id.clone()));
        }

        saved.sort();
        saved.reverse();
        assert_eq!(seen, saved);
    }

    #[test]
    fn latest_returns_most_recent_for_pair() {
        let (store, clock) = store_with_clock();
        assert!(store.latest("agent", "wf").unwrap().is_none());
        assert!(store.load_latest("agent", "wf").unwrap().is_none());

        let ids = save_series(&store, &clock, "agent", "wf", 3);
        save_series(&store, &clock, "agent", "other", 1);

        let latest = store.latest("agent", "wf").unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, ids[2]);

        let (meta, payload) = store.load_latest("agent", "wf").unwrap().unwrap();
        assert_eq!(meta.checkpoint_id, ids[2]);
        assert_eq!(payload, b"step-2");
    }

    // ── Pruning ────────────────────────────────────────────────────

    #[test]
    fn prune_by_count_keeps_most_recent() {
        let (store, clock) = store_with_clock();
        let ids = save_series(&store, &clock, "agent", "wf", 6);

        let report = store.prune(&RetentionPolicy::keep_last(4)).unwrap();
        assert_eq!(report, PruneReport { examined: 6, removed: 2 });
        assert_eq!(report.retained(), 4);

        let remaining: Vec<String> = store
            .list(&CheckpointFilter::default())
            .unwrap()
            .into_iter()
            .map(|m| m.checkpoint_id)
            .collect();
        assert_eq!(remaining, ids[2..].iter().rev().cloned().collect::<Vec<_>>());

        for pruned in &ids[..2] {
            assert!(matches!(store.load(pruned), Err(CheckpointError::NotFound(_))));
        }
    }

    #[test]
    fn prune_count_larger_than_total_keeps_all() {
        let (store, clock) = store_with_clock();
        save_series(&store, &clock, "agent", "wf", 3);
        let report = store.prune(&RetentionPolicy::keep_last(10)).unwrap();
        assert_eq!(report.removed, 0);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn prune_by_age() {
        let (store, clock) = store_with_clock();
        save_series(&store, &clock, "agent", "wf", 3);
        clock.advance(Duration::from_secs(3_600));
        let fresh = save_series(&store, &clock, "agent", "wf", 2);

        let report = store
            .prune(&RetentionPolicy::max_age(Duration::from_secs(600)))
            .unwrap();
        assert_eq!(report.removed, 3);

        let remaining: Vec<String> = store
            .list(&CheckpointFilter::default())
            .unwrap()
            .into_iter()
            .map(|m| m.checkpoint_id)
            .collect();
        assert_eq!(remaining, vec![fresh[1].clone(), fresh[0].clone()]);
    }

    #[test]
    fn prune_matching_only_touches_scope() {
        let (store, clock) = store_with_clock();
        save_series(&store, &clock, "agent-a", "wf", 4);
        save_series(&store, &clock, "agent-b", "wf", 4);

        let report = store
            .prune_matching(&CheckpointFilter::for_agent("agent-a"), &RetentionPolicy::keep_last(1))
            .unwrap();
        assert_eq!(report, PruneReport { examined: 4, removed: 3 });
        assert_eq!(store.list(&CheckpointFilter::for_agent("agent-a")).unwrap().len(), 1);
        assert_eq!(store.list(&CheckpointFilter::for_agent("agent-b")).unwrap().len(), 4);
    }

    #[test]
    fn unbounded_policy_removes_nothing() {
        let (store, clock) = store_with_clock();
        save_series(&store, &clock, "agent", "wf", 2);
        let report = store.prune(&RetentionPolicy::default()).unwrap();
        assert_eq!(report, PruneReport { examined: 2, removed: 0 });
    }

    #[test]
    fn prune_races_with_readers_and_writers() {
        let store = CheckpointStore::open_in_memory().unwrap();
        let seed: Vec<String> = (0..50)
            .map(|i| store.save("agent", "wf", &[i as u8; 64], true).unwrap().checkpoint_id)
            .collect();

        std::thread::scope(|s| {
            s.spawn(|| {
                for _ in 0..10 {
                    store.prune(&RetentionPolicy::keep_last(5)).unwrap();
                }
            });
            s.spawn(|| {
                for i in 0..50 {
                    store.save("agent", "wf", &[i as u8; 64], true).unwrap();
                }
            });
            s.spawn(|| {
                for id in &seed {
                    // Either the whole checkpoint or a clean NotFound.
                    match store.load(id) {
                        Ok(payload) => assert_eq!(payload.len(), 64),
                        Err(CheckpointError::NotFound(_)) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            });
        });

        store.prune(&RetentionPolicy::keep_last(5)).unwrap();
        assert_eq!(store.count().unwrap(), 5);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("checkpoints.redb");

        let id = {
            let store = CheckpointStore::open(&db_path).unwrap();
            store.save("agent", "wf", b"durable", true).unwrap().checkpoint_id
        };

        let store = CheckpointStore::open(&db_path).unwrap();
        assert_eq!(store.load(&id).unwrap(), b"durable");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = CheckpointStore::open_in_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.list(&CheckpointFilter::default()).unwrap().is_empty());
        assert_eq!(
            store.prune(&RetentionPolicy::keep_last(1)).unwrap(),
            PruneReport::default()
        );
    }
}
