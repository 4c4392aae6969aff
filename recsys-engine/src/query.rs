//! Read path for `GET /recommendations`: cache first, store on a miss.

use std::sync::Arc;

use recsys_core::{ProductId, StorageError, UserUid};
use recsys_storage::{RecommendationCache, Store};
use serde::Serialize;

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadSource {
    Cache,
    Store,
}

/// A user's recommendations, `popularity DESC, product_id ASC`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationRead {
    pub products: Vec<ProductId>,
    pub source: ReadSource,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Recommendations unavailable: {0}")]
    Store(#[from] StorageError),
}

/// Read-through cache over the recommendation store.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn Store>,
    cache: RecommendationCache,
}

impl std::fmt::Debug for QueryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryService")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl QueryService {
    pub fn new(store: Arc<dyn Store>, cache: RecommendationCache) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &RecommendationCache {
        &self.cache
    }

    /// Serve from cache when possible. A cache that errors is treated as a miss, and the
    /// repopulating write is best effort. Only a store failure fails the read.
    pub async fn get_recommendations(&self, uid: &UserUid) -> Result<RecommendationRead, QueryError> {
        match self.cache.get(uid).await {
            Ok(Some(products)) => {
                tracing::debug!(user_uid = %uid, count = products.len(), "Cache hit");
                return Ok(RecommendationRead {
                    products,
                    source: ReadSource::Cache,
                });
            }
            Ok(None) => tracing::debug!(user_uid = %uid, "Cache miss"),
            Err(e) => {
                tracing::warn!(error = %e, user_uid = %uid, "Cache read failed, falling back to store")
            }
        }

        let products = self.store.recommendations_for_user(uid).await.map_err(|e| {
            tracing::error!(error = %e, user_uid = %uid, "Failed to load recommendations");
            QueryError::from(e)
        })?;

        if let Err(e) = self.cache.put(uid, &products).await {
            tracing::warn!(error = %e, user_uid = %uid, "Failed to populate cache");
        }

        Ok(RecommendationRead {
            products,
            source: ReadSource::Store,
        })
    }
}
