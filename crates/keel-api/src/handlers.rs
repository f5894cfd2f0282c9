//! REST API handlers.
//!
//! Bodies are the bare JSON shapes the dashboard reads. Errors carry an
//! `{"error": ...}` body; storage outages map to 503.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::warn;

use keel_checkpoint::{CheckpointError, CheckpointFilter, CheckpointMetadata};

use crate::ApiState;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// `{checkpoints: [...]}` wrapper for the list route.
#[derive(Serialize)]
struct CheckpointList {
    checkpoints: Vec<CheckpointMetadata>,
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ErrorBody {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn checkpoint_error(e: &CheckpointError) -> Response {
    let status = match e {
        CheckpointError::NotFound(_) => StatusCode::NOT_FOUND,
        CheckpointError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CheckpointError::AlreadyExists(_) => StatusCode::CONFLICT,
        CheckpointError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CheckpointError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %e, "checkpoint query failed");
    }
    error_response(&e.to_string(), status)
}

// ── Metrics ────────────────────────────────────────────────────

/// GET /api/observability/metrics
pub async fn get_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.service.get_metrics())
}

// ── Circuit breakers ───────────────────────────────────────────

/// GET /api/observability/circuit-breakers
pub async fn get_circuit_breakers(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.service.get_circuit_breakers())
}

// ── Checkpoints ────────────────────────────────────────────────

/// GET /api/observability/checkpoints?agent_id=&workflow_id=&before=&before_id=&limit=
pub async fn list_checkpoints(
    State(state): State<ApiState>,
    Query(filter): Query<CheckpointFilter>,
) -> Response {
    match state.service.get_checkpoints(&filter) {
        Ok(checkpoints) => Json(CheckpointList { checkpoints }).into_response(),
        Err(e) => checkpoint_error(&e),
    }
}

/// GET /api/observability/checkpoints/{id}
pub async fn get_checkpoint(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.service.get_checkpoint(&id) {
        Ok(meta) => Json(meta).into_response(),
        Err(e) => checkpoint_error(&e),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /api/observability/health
///
/// Always 200: an open breaker is reported in the body, not as a failure.
pub async fn get_health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.service.get_health())
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = keel_metrics::render_prometheus(&state.service.get_metrics());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use keel_breaker::{BreakerConfig, BreakerRegistry};
    use keel_checkpoint::CheckpointStore;
    use keel_metrics::MetricsRegistry;
    use keel_observability::ObservabilityService;

    fn test_state() -> ApiState {
        let metrics = Arc::new(MetricsRegistry::new());
        let breakers = Arc::new(BreakerRegistry::new(
            Arc::clone(&metrics),
            BreakerConfig::new(2, 1, Duration::from_secs(30)),
        ));
        let store = CheckpointStore::open_in_memory().unwrap();
        ApiState {
            service: Arc::new(ObservabilityService::new(metrics, breakers, store)),
        }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn empty_metrics_are_empty_maps() {
        let resp = get_metrics(State(test_state())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(
            body,
            serde_json::json!({"counters": {}, "gauges": {}, "histograms": {}})
        );
    }

    #[tokio::test]
    async fn breakers_report_timeout_in_seconds() {
        let state = test_state();
        let llm = state.service.breaker("llm");
        llm.record_failure();
        llm.record_failure();

        let resp = get_circuit_breakers(State(state)).await.into_response();
        let body = body_json(resp).await;
        assert_eq!(body["llm"]["state"], "open");
        assert_eq!(body["llm"]["failure_count"], 0);
        assert_eq!(body["llm"]["config"]["timeout"], 30.0);
        assert!(body["llm"]["last_failure_time"].is_u64());
    }

    #[tokio::test]
    async fn list_checkpoints_wraps_results() {
        let state = test_state();
        state
            .service
            .checkpoints()
            .save("agent-1", "wf", b"state", false)
            .unwrap();
        state
            .service
            .checkpoints()
            .save("agent-2", "wf", b"state", false)
            .unwrap();

        let filter = CheckpointFilter::for_agent("agent-1");
        let resp = list_checkpoints(State(state), Query(filter)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        let list = body["checkpoints"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["agent_id"], "agent-1");
        assert_eq!(list[0]["size_bytes"], 5);
        assert_eq!(list[0]["compressed"], false);
    }

    #[tokio::test]
    async fn get_checkpoint_found_and_missing() {
        let state = test_state();
        let meta = state
            .service
            .checkpoints()
            .save("agent", "wf", b"state", true)
            .unwrap();

        let resp = get_checkpoint(State(state.clone()), Path(meta.checkpoint_id.clone())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["checkpoint_id"], meta.checkpoint_id.as_str());

        let resp = get_checkpoint(State(state), Path("nope".to_string())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[test]
    fn storage_errors_map_to_503() {
        let resp = checkpoint_error(&CheckpointError::StorageUnavailable("disk".into()));
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let resp = checkpoint_error(&CheckpointError::InvalidArgument("limit".into()));
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_is_200_even_when_degraded() {
        let state = test_state();
        let breaker = state.service.breaker("payments");
        breaker.record_failure();
        breaker.record_failure();

        let resp = get_health(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["circuit_breakers"]["open"], 1);
        assert_eq!(body["circuit_breakers"]["degraded"], true);
    }

    #[tokio::test]
    async fn prometheus_renders_text() {
        let state = test_state();
        state.service.metrics().incr("requests");
        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("keel_requests"));
    }
}
