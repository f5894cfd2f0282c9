//! Metrics registry — thread-safe counters, gauges, and histograms.
//!
//! Each metric kind lives in its own name → entry map behind an `RwLock`.
//! Updates to an existing entry only take the map's read lock and then
//! touch that single entry (an atomic, or the entry's own mutex), so
//! writers to different names never serialize on each other. The write
//! lock is taken only to insert a name seen for the first time.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MetricsError, MetricsResult};
use crate::histogram::{Histogram, HistogramSummary};

type EntryMap<T> = RwLock<HashMap<String, Arc<T>>>;

/// Process-local metrics store. Share it through an `Arc`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: EntryMap<AtomicU64>,
    /// Gauge values stored as `f64::to_bits`.
    gauges: EntryMap<AtomicU64>,
    histograms: EntryMap<Mutex<Histogram>>,
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// Number of distinct names per metric kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricTotals {
    pub counters: usize,
    pub gauges: usize,
    pub histograms: usize,
}

impl MetricsSnapshot {
    pub fn totals(&self) -> MetricTotals {
        MetricTotals {
            counters: self.counters.len(),
            gauges: self.gauges.len(),
            histograms: self.histograms.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty() && self.histograms.is_empty()
    }
}

/// Fetch the entry for `name`, inserting `init()` on first use.
fn entry<T>(map: &EntryMap<T>, name: &str, init: impl FnOnce() -> T) -> Arc<T> {
    if let Some(existing) = map
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
    {
        return Arc::clone(existing);
    }
    let mut guard = map.write().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(guard.entry(name.to_string()).or_insert_with(|| {
        debug!(metric = %name, "metric created");
        Arc::new(init())
    }))
}

fn lookup<T>(map: &EntryMap<T>, name: &str) -> Option<Arc<T>> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .cloned()
}

/// Clone the entry handles so values are read without holding the map lock.
fn handles<T>(map: &EntryMap<T>) -> Vec<(String, Arc<T>)> {
    map.read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(k, v)| (k.clone(), Arc::clone(v)))
        .collect()
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to a counter, creating it at zero if absent.
    ///
    /// Returns the new value. Counters never decrease, so a negative
    /// delta is rejected rather than clamped.
    pub fn increment_counter(&self, name: &str, delta: i64) -> MetricsResult<u64> {
        let delta = u64::try_from(delta).map_err(|_| {
            MetricsError::invalid(name, format!("counter delta must be >= 0, got {delta}"))
        })?;
        let counter = entry(&self.counters, name, || AtomicU64::new(0));
        Ok(counter.fetch_add(delta, Ordering::Relaxed) + delta)
    }

    /// Increment a counter by one.
    pub fn incr(&self, name: &str) -> u64 {
        let counter = entry(&self.counters, name, || AtomicU64::new(0));
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Overwrite a gauge.
    pub fn set_gauge(&self, name: &str, value: f64) {
        let gauge = entry(&self.gauges, name, || AtomicU64::new(0f64.to_bits()));
        gauge.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Record one observation. Non-finite values are rejected.
    pub fn observe_histogram(&self, name: &str, value: f64) -> MetricsResult<()> {
        if !value.is_finite() {
            return Err(MetricsError::invalid(
                name,
                format!("histogram value must be finite, got {value}"),
            ));
        }
        let histogram = entry(&self.histograms, name, || Mutex::new(Histogram::new()));
        histogram
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(value);
        Ok(())
    }

    pub fn counter(&self, name: &str) -> Option<u64> {
        lookup(&self.counters, name).map(|c| c.load(Ordering::Relaxed))
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        lookup(&self.gauges, name).map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSummary> {
        lookup(&self.histograms, name)
            .map(|h| h.lock().unwrap_or_else(PoisonError::into_inner).summary())
    }

    /// Entry counts only; cheaper than a full snapshot.
    pub fn totals(&self) -> MetricTotals {
        MetricTotals {
            counters: self.counters.read().unwrap_or_else(PoisonError::into_inner).len(),
            gauges: self.gauges.read().unwrap_or_else(PoisonError::into_inner).len(),
            histograms: self
                .histograms
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
        }
    }

    /// Copy every metric.
    ///
    /// Each histogram is read under its own lock, so a summary is never
    /// torn; different entries may reflect slightly different instants.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = handles(&self.counters)
            .into_iter()
            .map(|(name, c)| (name, c.load(Ordering::Relaxed)))
            .collect();
        let gauges = handles(&self.gauges)
            .into_iter()
            .map(|(name, g)| (name, f64::from_bits(g.load(Ordering::Relaxed))))
            .collect();
        let histograms = handles(&self.histograms)
            .into_iter()
            .map(|(name, h)| {
                let summary = h.lock().unwrap_or_else(PoisonError::into_inner).summary();
                (name, summary)
            })
            .collect();

        MetricsSnapshot {
            counters,
            gauges,
            histograms,
        }
    }
}
