//! Typed recommendation cache over a byte-oriented backend.
//!
//! Maps `user_uid -> ordered product ids`, encoded as the JSON list
//! `[{"product_id": n}, ...]`. Every backend call is bounded by the configured action
//! timeout. Callers decide what a failure means: the read path degrades, the write
//! path (invalidation after a mutation) propagates.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use recsys_core::{to_recommended, CacheError, ProductId, RecommendedProduct, UserUid};

use super::traits::{CacheBackend, CacheStats};

/// Configuration for the recommendation cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long a populated entry is trusted.
    pub ttl: Duration,
    /// Deadline for a single backend call.
    pub action_timeout: Duration,
    /// Prefix prepended to the user uid to form the backend key.
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            action_timeout: Duration::from_millis(500),
            key_prefix: "recommendations:".to_string(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

/// Recommendation cache shared by the query path and the event processor.
#[derive(Clone)]
pub struct RecommendationCache {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
}

impl std::fmt::Debug for RecommendationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationCache")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}

impl RecommendationCache {
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn key_for(&self, uid: &UserUid) -> String {
        format!("{}{}", self.config.key_prefix, uid)
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        tokio::time::timeout(self.config.action_timeout, fut)
            .await
            .unwrap_or(Err(CacheError::Timeout {
                operation,
                after: self.config.action_timeout,
            }))
    }

    /// Cached list for `uid`, or `None` on a miss or expired entry.
    pub async fn get(&self, uid: &UserUid) -> Result<Option<Vec<ProductId>>, CacheError> {
        let key = self.key_for(uid);
        let Some(bytes) = self.bounded("get", self.backend.get(&key)).await? else {
            return Ok(None);
        };
        let entries: Vec<RecommendedProduct> =
            serde_json::from_slice(&bytes).map_err(|e| CacheError::Serialization {
                reason: e.to_string(),
            })?;
        Ok(Some(entries.into_iter().map(|e| e.product_id).collect()))
    }

    /// Store `products` for `uid` with the configured TTL, preserving order.
    pub async fn put(&self, uid: &UserUid, products: &[ProductId]) -> Result<(), CacheError> {
        let key = self.key_for(uid);
        let bytes = serde_json::to_vec(&to_recommended(products)).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;
        self.bounded("set", self.backend.set(&key, &bytes, self.config.ttl))
            .await
    }

    /// Drop the entry for `uid`.
    pub async fn invalidate(&self, uid: &UserUid) -> Result<(), CacheError> {
        let key = self.key_for(uid);
        self.bounded("delete", self.backend.delete(&key)).await
    }

    /// Drop the entries for every uid, stopping at the first failure.
    /// Returns how many entries were invalidated.
    pub async fn invalidate_all<'a, I>(&self, uids: I) -> Result<usize, CacheError>
    where
        I: IntoIterator<Item = &'a UserUid>,
    {
        let mut count = 0;
        for uid in uids {
            self.invalidate(uid).await?;
            count += 1;
        }
        Ok(count)
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.bounded("stats", self.backend.stats()).await
    }

    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.bounded("health_check", self.backend.health_check())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheBackend;
    use async_trait::async_trait;

    fn cache() -> (RecommendationCache, Arc<InMemoryCacheBackend>) {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = RecommendationCache::new(backend.clone(), CacheConfig::default());
        (cache, backend)
    }

    /// Backend that never answers.
    struct HangingBackend;

    #[async_trait]
    impl CacheBackend for HangingBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            std::future::pending().await
        }
        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            std::future::pending().await
        }
        async fn stats(&self) -> Result<CacheStats, CacheError> {
            Ok(CacheStats::default())
        }
        fn name(&self) -> &'static str {
            "hanging"
        }
    }

    #[tokio::test]
    async fn test_put_then_get_preserves_order() {
        let (cache, _) = cache();
        let uid = UserUid::new("u1");
        let ids = vec![ProductId(9), ProductId(2), ProductId(5)];
        cache.put(&uid, &ids).await.unwrap();
        assert_eq!(cache.get(&uid).await.unwrap(), Some(ids));
    }

    #[tokio::test]
    async fn test_empty_list_is_a_hit() {
        let (cache, _) = cache();
        let uid = UserUid::new("u1");
        cache.put(&uid, &[]).await.unwrap();
        assert_eq!(cache.get(&uid).await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_wire_encoding() {
        let (cache, backend) = cache();
        let uid = UserUid::new("u1");
        cache.put(&uid, &[ProductId(3)]).await.unwrap();
        let raw = backend.get("recommendations:u1").await.unwrap().unwrap();
        assert_eq!(raw, br#"[{"product_id":3}]"#.to_vec());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_serialization_error() {
        let (cache, backend) = cache();
        backend
            .set("recommendations:u1", b"not json", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(matches!(
            cache.get(&UserUid::new("u1")).await,
            Err(CacheError::Serialization { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalidate_all_counts() {
        let (cache, backend) = cache();
        let users = [UserUid::new("a"), UserUid::new("b")];
        for uid in &users {
            cache.put(uid, &[ProductId(1)]).await.unwrap();
        }
        assert_eq!(cache.invalidate_all(&users).await.unwrap(), 2);
        assert!(backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_backend_times_out() {
        let cache = RecommendationCache::new(
            Arc::new(HangingBackend),
            CacheConfig::default().with_action_timeout(Duration::from_millis(50)),
        );
        let err = cache.get(&UserUid::new("u")).await.unwrap_err();
        assert_eq!(
            err,
            CacheError::Timeout {
                operation: "get",
                after: Duration::from_millis(50),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = RecommendationCache::new(
            backend,
            CacheConfig::default().with_ttl(Duration::from_secs(30)),
        );
        let uid = UserUid::new("u");
        cache.put(&uid, &[ProductId(1)]).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(&uid).await.unwrap(), None);
    }
}
