//! `GET /recommendations`
//!
//! Returns the caller's recommendations, `popularity DESC, product_id ASC`. An unknown
//! user gets an empty list. A store failure is answered with 404.

use axum::{extract::State, routing::get, Json, Router};
use recsys_core::{to_recommended, RecommendedProduct};
use recsys_engine::QueryService;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::middleware::Identity;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationsResponse {
    pub recommendations: Vec<RecommendedProduct>,
}

pub async fn get_recommendations(
    State(query): State<QueryService>,
    identity: Identity,
) -> ApiResult<Json<RecommendationsResponse>> {
    let read = query.get_recommendations(&identity.user_uid).await?;
    tracing::debug!(
        user_uid = %identity.user_uid,
        count = read.products.len(),
        source = ?read.source,
        "Recommendations served"
    );
    Ok(Json(RecommendationsResponse {
        recommendations: to_recommended(&read.products),
    }))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/recommendations", get(get_recommendations))
}
