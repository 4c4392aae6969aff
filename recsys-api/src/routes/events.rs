//! `POST /events/{topic}`
//!
//! Publishes one message onto the in-process bus so a single-process deployment can be
//! driven over HTTP. Admin only. Mounted only when the in-memory transport is active.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use recsys_core::Topic;
use recsys_engine::EventPublisher;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AdminIdentity;
use crate::state::AppState;

/// Message to publish. `payload` is sent as-is when it is a JSON string, and
/// serialized otherwise, so malformed payloads can be injected on purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub key: String,
    pub payload: serde_json::Value,
}

impl PublishRequest {
    fn payload_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        match &self.payload {
            serde_json::Value::String(raw) => Ok(raw.clone().into_bytes()),
            other => serde_json::to_vec(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub topic: Topic,
    pub offset: i64,
}

pub async fn publish_event(
    State(publisher): State<Option<EventPublisher>>,
    AdminIdentity(identity): AdminIdentity,
    Path(topic): Path<String>,
    Json(request): Json<PublishRequest>,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    let publisher = publisher
        .ok_or_else(|| ApiError::service_unavailable("In-process event bus is not active"))?;
    let topic: Topic = topic
        .parse()
        .map_err(|_| ApiError::not_found(format!("Unknown topic '{}'", topic)))?;
    let payload = request.payload_bytes()?;

    let offset = publisher
        .publish(topic, request.key.as_bytes(), payload)
        .await?;
    tracing::info!(
        topic = %topic,
        key = %request.key,
        offset,
        published_by = %identity.user_uid,
        "Event published"
    );

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { topic, offset })))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/events/:topic", post(publish_event))
}
