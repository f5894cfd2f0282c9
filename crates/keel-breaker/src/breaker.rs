//! A single named circuit breaker.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keel_core::SharedClock;
use keel_metrics::MetricsRegistry;

use crate::config::BreakerConfig;
use crate::error::CallError;
use crate::state::{BreakerEvent, BreakerState, BreakerStatus, Transition};

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    last_failure_time: Option<SystemTime>,
}

/// Guards calls to one downstream dependency.
///
/// All state lives behind one mutex per breaker, so transitions for a
/// given name are serialized. The state gauge is written under that lock
/// so it always matches the latest transition; counters and logs are
/// emitted after it is released.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    metrics: Arc<MetricsRegistry>,
    clock: SharedClock,
}

/// Reporting view of a breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerStatus,
    pub failure_count: u32,
    pub success_count: u32,
    /// Unix seconds of the most recent recorded failure.
    pub last_failure_time: Option<u64>,
    pub config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        config: BreakerConfig,
        metrics: Arc<MetricsRegistry>,
        clock: SharedClock,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::default(),
                last_failure_time: None,
            }),
            metrics,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn status(&self) -> BreakerStatus {
        self.lock().state.status()
    }

    /// Whether a call may proceed. Never blocks beyond the breaker's own lock.
    ///
    /// An `open` breaker whose timeout has elapsed moves to `half_open`
    /// here and admits the caller as its first trial call.
    pub fn allow(&self) -> bool {
        let admitted = self.apply(BreakerEvent::Probe);
        if !admitted {
            self.metrics
                .incr(&format!("circuit_breaker.rejected.{}", self.name));
            debug!(breaker = %self.name, "call rejected");
        }
        admitted
    }

    pub fn record_success(&self) {
        self.apply(BreakerEvent::Success);
    }

    pub fn record_failure(&self) {
        self.apply(BreakerEvent::Failure);
    }

    /// Run `fut` through the breaker, counting every `Err` as a failure.
    pub async fn call<T, E, F>(&self, fut: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.call_with(fut, |_| true).await
    }

    /// Run `fut` through the breaker. Errors for which `is_failure` returns
    /// false (a "not found", say) are passed through as successes of the
    /// dependency itself.
    pub async fn call_with<T, E, F, P>(&self, fut: F, is_failure: P) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
        P: FnOnce(&E) -> bool,
    {
        if !self.allow() {
            return Err(CallError::Rejected {
                breaker: self.name.clone(),
            });
        }
        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if is_failure(&e) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(CallError::Inner(e))
            }
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state.status(),
            failure_count: inner.state.failure_count(),
            success_count: inner.state.success_count(),
            last_failure_time: inner.last_failure_time.map(unix_secs),
            config: self.config,
        }
    }

    /// Publish the current state gauge (used when a breaker is created).
    pub fn publish_state(&self) {
        let inner = self.lock();
        self.set_state_gauge(inner.state.status());
    }

    fn apply(&self, event: BreakerEvent) -> bool {
        let now = self.clock.now();
        let step = {
            let mut inner = self.lock();
            let step = inner.state.on(event, &self.config, now);
            if event == BreakerEvent::Failure && inner.state.status() != BreakerStatus::Open {
                inner.last_failure_time = Some(now);
            }
            inner.state = step.state;
            if let Some(transition) = step.transition {
                self.set_state_gauge(transition.to);
            }
            step
        };
        if let Some(transition) = step.transition {
            self.emit(transition);
        }
        step.admitted
    }

    fn emit(&self, transition: Transition) {
        let Transition { from, to } = transition;
        self.metrics.incr(&format!(
            "circuit_breaker.transitions.{}.{}",
            self.name,
            to.as_str()
        ));

        match to {
            BreakerStatus::Open => warn!(breaker = %self.name, %from, "circuit opened"),
            BreakerStatus::HalfOpen => info!(breaker = %self.name, %from, "circuit half-open, probing"),
            BreakerStatus::Closed => info!(breaker = %self.name, %from, "circuit closed"),
        }
    }

    fn set_state_gauge(&self, status: BreakerStatus) {
        self.metrics
            .set_gauge(&format!("circuit_breaker.state.{}", self.name), status.ordinal());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
