//! Identity Middleware
//!
//! Resolves the caller through the external identity collaborator and injects an
//! [`Identity`] into request extensions. Handlers take [`Identity`] (or [`AdminIdentity`])
//! as an extractor; a request without a usable identity is rejected with 401 at the
//! extractor, never deeper in the handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use recsys_core::UserUid;
use serde::Deserialize;

use crate::error::ApiError;

// ============================================================================
// IDENTITY
// ============================================================================

/// Caller identity issued by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_uid: UserUid,
    pub is_admin: bool,
}

impl Identity {
    pub fn user(uid: impl Into<UserUid>) -> Self {
        Self {
            user_uid: uid.into(),
            is_admin: false,
        }
    }

    pub fn admin(uid: impl Into<UserUid>) -> Self {
        Self {
            user_uid: uid.into(),
            is_admin: true,
        }
    }
}

/// Wire shape of the collaborator's answer.
#[derive(Debug, Deserialize)]
struct WhoAmI {
    #[serde(default)]
    user_uid: Option<String>,
    #[serde(default)]
    is_admin: bool,
}

impl WhoAmI {
    fn into_identity(self) -> Option<Identity> {
        let uid = self.user_uid?;
        let uid = uid.trim();
        if uid.is_empty() {
            return None;
        }
        Some(Identity {
            user_uid: UserUid::new(uid),
            is_admin: self.is_admin,
        })
    }
}

// ============================================================================
// COLLABORATOR CLIENT
// ============================================================================

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("identity request failed: {0}")]
    Request(String),

    #[error("identity service answered {0}")]
    Status(u16),

    #[error("identity response could not be decoded: {0}")]
    Decode(String),
}

/// Resolves a session cookie to an identity.
///
/// `Ok(None)` means the session is not authenticated. `Err` means the collaborator
/// could not answer.
#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn identify(&self, cookie: &str) -> Result<Option<Identity>, AuthError>;
}

/// `GET {auth_url}` with the caller's `Cookie` header forwarded.
#[derive(Debug, Clone)]
pub struct HttpAuthClient {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::internal_error(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn identify(&self, cookie: &str) -> Result<Option<Identity>, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::COOKIE, cookie)
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let body: WhoAmI = response
            .json()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))?;
        Ok(body.into_identity())
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Look up the caller when a session cookie is present.
///
/// Requests without a cookie pass through without an identity; the extractor decides
/// whether that is acceptable for the route.
pub async fn identity_middleware(
    State(auth): State<Arc<dyn AuthClient>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let cookie = request
        .headers()
        .get(header::COOKIE)
        .and_then(|h| h.to_str().ok())
        .map(str::to_owned);

    if let Some(cookie) = cookie {
        match auth.identify(&cookie).await {
            Ok(Some(identity)) => {
                tracing::debug!(user_uid = %identity.user_uid, is_admin = identity.is_admin, "Identity resolved");
                request.extensions_mut().insert(identity);
            }
            Ok(None) => tracing::debug!("Session not authenticated"),
            Err(e) => {
                tracing::error!(error = %e, "Identity lookup failed");
                return Err(ApiError::internal_error("Identity lookup failed"));
            }
        }
    }

    Ok(next.run(request).await)
}

// ============================================================================
// EXTRACTORS
// ============================================================================

#[axum::async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .filter(|identity| !identity.user_uid.is_empty())
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// An [`Identity`] carrying the admin flag. 401 without identity, 403 without the flag.
#[derive(Debug, Clone)]
pub struct AdminIdentity(pub Identity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = Identity::from_request_parts(parts, state).await?;
        if !identity.is_admin {
            return Err(ApiError::forbidden("Admin identity required"));
        }
        Ok(AdminIdentity(identity))
    }
}

impl std::ops::Deref for AdminIdentity {
    type Target = Identity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
