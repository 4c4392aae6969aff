//! Per-call deadline for store operations.
//!
//! `Timed<S>` wraps any store and bounds each call with `tokio::time::timeout`. An
//! expired call yields [`StorageError::Timeout`], which the event path treats like any
//! other store failure (no ack, redelivery).

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use recsys_core::{Product, ProductId, StorageError, StorageResult, TagSet, User, UserUid};

use crate::store::{CatalogStore, ProductEdges, RecommendationStore, ReplaceOutcome};

/// Store decorator enforcing a deadline on every call.
#[derive(Debug, Clone)]
pub struct Timed<S> {
    inner: S,
    deadline: Duration,
}

impl<S> Timed<S> {
    pub fn new(inner: S, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> StorageResult<T>
    where
        F: Future<Output = StorageResult<T>>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, deadline_ms = self.deadline.as_millis() as u64, "store call timed out");
                Err(StorageError::Timeout {
                    operation,
                    after: self.deadline,
                })
            }
        }
    }
}

#[async_trait]
impl<S: CatalogStore> CatalogStore for Timed<S> {
    async fn get_user(&self, uid: &UserUid) -> StorageResult<Option<User>> {
        self.bounded("get_user", self.inner.get_user(uid)).await
    }

    async fn list_users(&self, after: Option<&UserUid>, limit: usize) -> StorageResult<Vec<User>> {
        self.bounded("list_users", self.inner.list_users(after, limit))
            .await
    }

    async fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>> {
        self.bounded("get_product", self.inner.get_product(id)).await
    }

    async fn products_with_any_tag(&self, tags: &TagSet) -> StorageResult<Vec<Product>> {
        self.bounded("products_with_any_tag", self.inner.products_with_any_tag(tags))
            .await
    }

    async fn upsert_product(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
        self.bounded("upsert_product", self.inner.upsert_product(id, tags))
            .await
    }

    async fn update_product_tags(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
        self.bounded("update_product_tags", self.inner.update_product_tags(id, tags))
            .await
    }

    async fn delete_product(&self, id: ProductId) -> StorageResult<Option<BTreeSet<UserUid>>> {
        self.bounded("delete_product", self.inner.delete_product(id))
            .await
    }

    async fn increment_popularity(&self, id: ProductId) -> StorageResult<bool> {
        self.bounded("increment_popularity", self.inner.increment_popularity(id))
            .await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.bounded("health_check", self.inner.health_check()).await
    }
}

#[async_trait]
impl<S: RecommendationStore> RecommendationStore for Timed<S> {
    async fn rebuild_user_recommendations(&self, user: &User) -> StorageResult<ReplaceOutcome> {
        self.bounded(
            "rebuild_user_recommendations",
            self.inner.rebuild_user_recommendations(user),
        )
        .await
    }

    async fn rebuild_product_recommendations(
        &self,
        product: ProductId,
        page_size: usize,
    ) -> StorageResult<ProductEdges> {
        self.bounded(
            "rebuild_product_recommendations",
            self.inner.rebuild_product_recommendations(product, page_size),
        )
        .await
    }

    async fn recommendations_for_user(&self, uid: &UserUid) -> StorageResult<Vec<ProductId>> {
        self.bounded(
            "recommendations_for_user",
            self.inner.recommendations_for_user(uid),
        )
        .await
    }

    async fn users_for_product(&self, product: ProductId) -> StorageResult<BTreeSet<UserUid>> {
        self.bounded("users_for_product", self.inner.users_for_product(product))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockStorage;

    /// Store whose user lookups never complete in time.
    struct SlowStore {
        delay: Duration,
        inner: MockStorage,
    }

    #[async_trait]
    impl CatalogStore for SlowStore {
        async fn get_user(&self, uid: &UserUid) -> StorageResult<Option<User>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_user(uid).await
        }
        async fn list_users(&self, after: Option<&UserUid>, limit: usize) -> StorageResult<Vec<User>> {
            self.inner.list_users(after, limit).await
        }
        async fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>> {
            self.inner.get_product(id).await
        }
        async fn products_with_any_tag(&self, tags: &TagSet) -> StorageResult<Vec<Product>> {
            self.inner.products_with_any_tag(tags).await
        }
        async fn upsert_product(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
            self.inner.upsert_product(id, tags).await
        }
        async fn update_product_tags(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
            self.inner.update_product_tags(id, tags).await
        }
        async fn delete_product(&self, id: ProductId) -> StorageResult<Option<BTreeSet<UserUid>>> {
            self.inner.delete_product(id).await
        }
        async fn increment_popularity(&self, id: ProductId) -> StorageResult<bool> {
            self.inner.increment_popularity(id).await
        }
        async fn health_check(&self) -> StorageResult<()> {
            self.inner.health_check().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let store = Timed::new(
            SlowStore {
                delay: Duration::from_secs(5),
                inner: MockStorage::new(),
            },
            Duration::from_millis(100),
        );

        let err = store.get_user(&UserUid::new("u")).await.unwrap_err();
        assert_eq!(
            err,
            StorageError::Timeout {
                operation: "get_user",
                after: Duration::from_millis(100),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_call_passes_through() {
        let store = Timed::new(MockStorage::new(), Duration::from_millis(100));
        assert!(store.upsert_product(ProductId(1), &TagSet::new()).await.unwrap());
        assert!(store.get_product(ProductId(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_inner_errors_are_not_masked() {
        let mock = MockStorage::new();
        mock.set_unavailable(true);
        let store = Timed::new(mock, Duration::from_secs(1));
        assert!(matches!(
            store.health_check().await,
            Err(StorageError::Backend { .. })
        ));
    }
}
