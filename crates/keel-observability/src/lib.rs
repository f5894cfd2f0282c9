//! keel-observability — the façade dashboards and workers talk to.
//!
//! [`ObservabilityService`] owns the metrics registry, the breaker
//! registry, and the checkpoint store. It answers snapshot and health
//! queries and runs checkpoint I/O on the blocking pool behind a timeout
//! and the `checkpoint_store` circuit breaker.
//!
//! The service is constructed explicitly and shared via `Arc`; nothing in
//! the substrate is a process-wide singleton.

pub mod error;
pub mod health;
pub mod service;

pub use error::{ServiceError, ServiceResult};
pub use health::{BreakerHealth, CheckpointHealth, HealthReport, HealthStatus};
pub use service::{CHECKPOINT_BREAKER, ObservabilityService};
