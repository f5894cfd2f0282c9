//! keel-metrics — in-process metrics for the Keel substrate.
//!
//! Counters, gauges, and lightweight histograms (count/sum/min/max) held in
//! an explicitly constructed [`MetricsRegistry`]. There is no global
//! registry; callers share one through an `Arc`.
//!
//! # Architecture
//!
//! ```text
//! MetricsRegistry
//!   ├── increment_counter() ← AtomicU64 per name
//!   ├── set_gauge()         ← f64 bits in an AtomicU64 per name
//!   ├── observe_histogram() ← Mutex<Histogram> per name
//!   └── snapshot() → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for the /metrics endpoint
//! ```

pub mod error;
pub mod histogram;
pub mod prometheus;
pub mod registry;

pub use error::{MetricsError, MetricsResult};
pub use histogram::{Histogram, HistogramSummary};
pub use prometheus::render_prometheus;
pub use registry::{MetricTotals, MetricsRegistry, MetricsSnapshot};
