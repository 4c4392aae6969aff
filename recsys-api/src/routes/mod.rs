//! REST API Routes Module
//!
//! - `GET /recommendations` (identity required)
//! - `POST /events/{topic}` (admin identity, in-memory transport only)
//! - `/health/*` (no identity)

pub mod events;
pub mod health;
pub mod recommendations;

use std::time::Duration;

use axum::{
    http::{header, Method},
    middleware::from_fn_with_state,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::middleware::identity_middleware;
use crate::state::AppState;

/// Build the full router. The events route is mounted only when `state` carries a
/// publisher.
pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let mut api = recommendations::routes();
    if state.publisher.is_some() {
        api = api.merge(events::routes());
    }
    let api = api.layer(from_fn_with_state(state.auth.clone(), identity_middleware));

    Router::new()
        .merge(api)
        .nest("/health", health::routes())
        .fallback(not_found)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
        .with_state(state)
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::COOKIE])
        .allow_origin(Any)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
