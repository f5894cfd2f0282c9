//! keel-api — read-only REST API over the observability service.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/observability/metrics` | Metrics snapshot |
//! | GET | `/api/observability/circuit-breakers` | All breaker snapshots |
//! | GET | `/api/observability/checkpoints` | List checkpoint metadata |
//! | GET | `/api/observability/checkpoints/{id}` | One checkpoint's metadata |
//! | GET | `/api/observability/health` | Health report |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use keel_observability::ObservabilityService;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ObservabilityService>,
}

/// Build the complete API router (observability routes + Prometheus).
pub fn build_router(service: Arc<ObservabilityService>) -> Router {
    let state = ApiState { service };

    let api_routes = Router::new()
        .route("/metrics", get(handlers::get_metrics))
        .route("/circuit-breakers", get(handlers::get_circuit_breakers))
        .route("/checkpoints", get(handlers::list_checkpoints))
        .route("/checkpoints/{id}", get(handlers::get_checkpoint))
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    Router::new()
        .nest("/api/observability", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
