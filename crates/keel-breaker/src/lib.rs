//! keel-breaker — circuit breakers guarding downstream dependencies.
//!
//! # Architecture
//!
//! ```text
//! BreakerRegistry
//!   └── get_or_create(name) → Arc<CircuitBreaker>   (one per name, lazily)
//!
//! CircuitBreaker
//!   ├── allow() / record_success() / record_failure()
//!   ├── Mutex<BreakerState> ← BreakerState::on(event) computes the next state
//!   └── MetricsRegistry      ← transitions emitted after the lock is released
//! ```
//!
//! # State machine
//!
//! `closed` trips to `open` after `failure_threshold` consecutive failures.
//! Once `timeout` has elapsed the next `allow()` moves it to `half_open`,
//! where at most `half_open_max_calls` trial calls run at a time.
//! `success_threshold` successes close it again; any failure reopens it.

pub mod breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;

pub use breaker::{BreakerSnapshot, CircuitBreaker};
pub use config::BreakerConfig;
pub use error::{BreakerError, BreakerResult, CallError};
pub use registry::BreakerRegistry;
pub use state::{BreakerEvent, BreakerState, BreakerStatus, Step, Transition};
