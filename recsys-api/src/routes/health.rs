//! Health Check Endpoints
//!
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - Store, cache and topic worker probes
//!
//! No authentication required for health endpoints. A cache outage degrades readiness
//! without failing it, since reads fall back to the store.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use recsys_core::{health::aggregate, HealthCheck, HealthStatus, Topic};
use recsys_engine::WorkerMetricsSnapshot;
use serde::Serialize;

use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDetails {
    pub checks: Vec<HealthCheck>,
    pub workers: Vec<WorkerStatus>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub topic: Topic,
    #[serde(flatten)]
    pub metrics: WorkerMetricsSnapshot,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = vec![check_store(&state).await, check_cache(&state).await];

    let workers = {
        let runtime = state.runtime.read().await;
        match runtime.as_ref() {
            Some(runtime) => {
                checks.push(if runtime.is_running() {
                    HealthCheck::healthy("workers")
                } else {
                    HealthCheck::unhealthy("workers", "a topic worker has stopped")
                });
                runtime
                    .snapshot()
                    .into_iter()
                    .map(|(topic, metrics)| WorkerStatus { topic, metrics })
                    .collect()
            }
            None => Vec::new(),
        }
    };

    let status = aggregate(&checks);
    let status_code = if status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let response = HealthResponse {
        status,
        message: None,
        details: Some(HealthDetails {
            checks,
            workers,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };

    (status_code, Json(response))
}

async fn check_store(state: &AppState) -> HealthCheck {
    let start = Instant::now();
    match state.store.health_check().await {
        Ok(()) => HealthCheck::healthy("store").with_latency(start.elapsed().as_millis() as u64),
        Err(e) => HealthCheck::unhealthy("store", e.to_string()),
    }
}

async fn check_cache(state: &AppState) -> HealthCheck {
    let start = Instant::now();
    let cache = state.query.cache();
    match cache.health_check().await {
        Ok(()) => HealthCheck::healthy(format!("cache:{}", cache.backend().name()))
            .with_latency(start.elapsed().as_millis() as u64),
        Err(e) => HealthCheck::degraded(format!("cache:{}", cache.backend().name()), e.to_string()),
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(ping))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
}
