//! Event processor: applies decoded events to the store and keeps the cache honest.
//!
//! The protocols:
//!
//! - `user_update`: recompute the user's edges from the products sharing a tag with
//!   their interests, in one store transaction, then invalidate their cache entry.
//! - `product_create` / `product_update`: write the product, then have the store scan
//!   users in pages and replace the product's edges with the users whose interests match.
//!
//! Matching happens inside the store's rebuild call rather than here, so the user and
//! product workers can run side by side without losing an edge between them.
//! - `product_delete`: remove the product and its edges atomically.
//! - `view_products`: bump popularity.
//!
//! A product mutation can change what any user sees, so it invalidates every user whose
//! edge to the product was removed or added (switchable off).

use std::collections::BTreeSet;
use std::sync::Arc;

use recsys_core::{DomainEvent, EventError, EventKind, ProductId, TagSet, Topic, User, UserUid};
use recsys_storage::{RecommendationCache, Store};

use crate::config::ProcessorConfig;

/// Why an event was acknowledged without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Action not handled on this topic.
    UnknownAction,
    /// `product_update` or `view_products` for a product that does not exist.
    UnknownProduct,
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    UserRebuilt {
        /// The uid had not been seen before.
        created: bool,
        edges: u64,
    },
    ProductRebuilt {
        created: bool,
        holders: usize,
        invalidated: usize,
    },
    ProductDeleted {
        invalidated: usize,
    },
    PopularityIncremented,
    Ignored {
        reason: IgnoreReason,
    },
}

impl Outcome {
    pub fn is_ignored(&self) -> bool {
        matches!(self, Outcome::Ignored { .. })
    }
}

/// Applies events to the store and cache.
#[derive(Clone)]
pub struct EventProcessor {
    store: Arc<dyn Store>,
    cache: RecommendationCache,
    config: ProcessorConfig,
}

impl std::fmt::Debug for EventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventProcessor")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EventProcessor {
    pub fn new(store: Arc<dyn Store>, cache: RecommendationCache, config: ProcessorConfig) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Decode a raw message and handle it.
    pub async fn handle_message(
        &self,
        topic: Topic,
        key: &[u8],
        payload: &[u8],
    ) -> Result<Outcome, EventError> {
        let event = DomainEvent::decode(topic, key, payload)?;
        self.handle(&event).await
    }

    /// Handle one decoded event.
    pub async fn handle(&self, event: &DomainEvent) -> Result<Outcome, EventError> {
        tracing::info!(
            topic = %event.topic,
            key = %event.key,
            action = %event.action,
            tags = ?event.tags,
            time = %event.occurred_at.to_rfc3339(),
            "Event received"
        );

        match &event.kind {
            EventKind::UserUpdated { uid, interests } => self.rebuild_user(uid, interests).await,
            EventKind::ProductCreated { id, tags } => {
                let created = self.store.upsert_product(*id, tags).await?;
                self.rebuild_product(*id, created).await
            }
            EventKind::ProductUpdated { id, tags } => {
                if !self.store.update_product_tags(*id, tags).await? {
                    tracing::warn!(product_id = %id, "product_update for unknown product, ignoring");
                    return Ok(Outcome::Ignored {
                        reason: IgnoreReason::UnknownProduct,
                    });
                }
                self.rebuild_product(*id, false).await
            }
            EventKind::ProductDeleted { id } => self.delete_product(*id).await,
            EventKind::ProductViewed { id } => {
                if self.store.increment_popularity(*id).await? {
                    Ok(Outcome::PopularityIncremented)
                } else {
                    tracing::warn!(product_id = %id, "view_products for unknown product, ignoring");
                    Ok(Outcome::Ignored {
                        reason: IgnoreReason::UnknownProduct,
                    })
                }
            }
            EventKind::Unrecognized => {
                tracing::warn!(
                    topic = %event.topic,
                    action = %event.action,
                    "Unknown action, acknowledging without effect"
                );
                Ok(Outcome::Ignored {
                    reason: IgnoreReason::UnknownAction,
                })
            }
        }
    }

    async fn rebuild_user(&self, uid: &UserUid, interests: &TagSet) -> Result<Outcome, EventError> {
        let created = self.store.get_user(uid).await?.is_none();

        let user = User::new(uid.clone(), interests.clone());
        let outcome = self.store.rebuild_user_recommendations(&user).await?;
        self.cache.invalidate(uid).await?;

        tracing::debug!(
            user_uid = %uid,
            created,
            removed = outcome.removed,
            inserted = outcome.inserted,
            "User recommendations rebuilt"
        );

        Ok(Outcome::UserRebuilt {
            created,
            edges: outcome.inserted,
        })
    }

    async fn rebuild_product(&self, id: ProductId, created: bool) -> Result<Outcome, EventError> {
        let edges = self
            .store
            .rebuild_product_recommendations(id, self.config.user_page_size.max(1))
            .await?;

        let invalidated = if self.config.invalidate_on_product_change {
            let affected: BTreeSet<&UserUid> =
                edges.previous.iter().chain(edges.current.iter()).collect();
            self.cache.invalidate_all(affected).await?
        } else {
            0
        };

        tracing::debug!(
            product_id = %id,
            created,
            previous = edges.previous.len(),
            holders = edges.current.len(),
            invalidated,
            "Product recommendations rebuilt"
        );

        Ok(Outcome::ProductRebuilt {
            created,
            holders: edges.current.len(),
            invalidated,
        })
    }

    async fn delete_product(&self, id: ProductId) -> Result<Outcome, EventError> {
        let Some(holders) = self.store.delete_product(id).await? else {
            tracing::debug!(product_id = %id, "product_delete for unknown product");
            return Ok(Outcome::ProductDeleted { invalidated: 0 });
        };

        let invalidated = if self.config.invalidate_on_product_change {
            self.cache.invalidate_all(&holders).await?
        } else {
            0
        };

        Ok(Outcome::ProductDeleted { invalidated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recsys_core::{tag_set, CacheError, StorageError};
    use recsys_storage::{CacheConfig, InMemoryCacheBackend, MockStorage};
    use recsys_test_utils::fixtures::{product, product_message, user, user_message};

    struct Harness {
        store: MockStorage,
        backend: Arc<InMemoryCacheBackend>,
        cache: RecommendationCache,
        processor: EventProcessor,
    }

    fn harness_with(store: MockStorage, config: ProcessorConfig) -> Harness {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = RecommendationCache::new(backend.clone(), CacheConfig::default());
        let processor = EventProcessor::new(Arc::new(store.clone()), cache.clone(), config);
        Harness {
            store,
            backend,
            cache,
            processor,
        }
    }

    fn harness(store: MockStorage) -> Harness {
        harness_with(store, ProcessorConfig::default())
    }

    async fn send_product(h: &Harness, action: &str, id: i64, tags: &[&str]) -> Result<Outcome, EventError> {
        let (key, body) = product_message(action, id, tags);
        h.processor.handle_message(Topic::Product, &key, &body).await
    }

    async fn send_user(h: &Harness, uid: &str, tags: &[&str]) -> Result<Outcome, EventError> {
        let (key, body) = user_message(uid, tags);
        h.processor.handle_message(Topic::User, &key, &body).await
    }

    #[tokio::test]
    async fn test_user_update_builds_edges_and_invalidates() {
        let store = MockStorage::new();
        store.insert_product(product(1, &["a"], 0)).unwrap();
        store.insert_product(product(2, &["b"], 0)).unwrap();
        store.insert_product(product(3, &["c"], 0)).unwrap();
        let h = harness(store);
        let uid = UserUid::new("u1");
        h.cache.put(&uid, &[ProductId(99)]).await.unwrap();

        let outcome = send_user(&h, "u1", &["a", "b"]).await.unwrap();

        assert_eq!(outcome, Outcome::UserRebuilt { created: true, edges: 2 });
        assert_eq!(
            h.store.edges_for_user(&uid),
            [ProductId(1), ProductId(2)].into_iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(h.cache.get(&uid).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_user_update_replaces_interests_for_existing_user() {
        let store = MockStorage::new();
        store.insert_product(product(1, &["a"], 0)).unwrap();
        store.insert_product(product(2, &["b"], 0)).unwrap();
        let h = harness(store);

        send_user(&h, "u1", &["a"]).await.unwrap();
        let outcome = send_user(&h, "u1", &["b"]).await.unwrap();

        assert_eq!(outcome, Outcome::UserRebuilt { created: false, edges: 1 });
        assert_eq!(
            h.store.edges_for_user(&UserUid::new("u1")),
            BTreeSet::from([ProductId(2)])
        );
    }

    #[tokio::test]
    async fn test_user_with_no_interests_has_no_edges() {
        let store = MockStorage::new();
        store.insert_product(product(1, &["a"], 0)).unwrap();
        let h = harness(store);

        let outcome = send_user(&h, "u1", &[]).await.unwrap();
        assert_eq!(outcome, Outcome::UserRebuilt { created: true, edges: 0 });
        assert_eq!(h.store.user_count(), 1);
        assert_eq!(h.store.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_product_create_fans_out_across_pages() {
        let store = MockStorage::new();
        for i in 0..7 {
            let tags: &[&str] = if i % 2 == 0 { &["a"] } else { &["z"] };
            store.insert_user(user(&format!("u{}", i), tags)).unwrap();
        }
        let h = harness_with(store, ProcessorConfig::default().with_user_page_size(2));

        let outcome = send_product(&h, "product_create", 5, &["a"]).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::ProductRebuilt { created: true, holders: 4, invalidated: 4 }
        );
        assert_eq!(h.store.edge_count(), 4);
        assert_eq!(h.store.popularity(ProductId(5)), Some(0));
    }

    #[tokio::test]
    async fn test_product_create_replay_keeps_popularity() {
        let store = MockStorage::new();
        let h = harness(store);

        send_product(&h, "product_create", 5, &["a"]).await.unwrap();
        send_product(&h, "view_products", 5, &[]).await.unwrap();
        let outcome = send_product(&h, "product_create", 5, &["a"]).await.unwrap();

        assert!(matches!(outcome, Outcome::ProductRebuilt { created: false, .. }));
        assert_eq!(h.store.popularity(ProductId(5)), Some(1));
    }

    #[tokio::test]
    async fn test_product_update_moves_edges_and_invalidates_both_sides() {
        let store = MockStorage::new();
        store.insert_user(user("old", &["a"])).unwrap();
        store.insert_user(user("new", &["b"])).unwrap();
        let h = harness(store);
        send_product(&h, "product_create", 1, &["a"]).await.unwrap();

        for uid in ["old", "new"] {
            h.cache.put(&UserUid::new(uid), &[]).await.unwrap();
        }

        let outcome = send_product(&h, "product_update", 1, &["b"]).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::ProductRebuilt { created: false, holders: 1, invalidated: 2 }
        );
        assert!(h.store.edges_for_user(&UserUid::new("old")).is_empty());
        assert_eq!(
            h.store.edges_for_user(&UserUid::new("new")),
            BTreeSet::from([ProductId(1)])
        );
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_product_update_unknown_product_is_ignored() {
        let store = MockStorage::new();
        store.insert_user(user("u", &["a"])).unwrap();
        let h = harness(store);

        let outcome = send_product(&h, "product_update", 404, &["a"]).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored { reason: IgnoreReason::UnknownProduct });
        assert_eq!(h.store.product_count(), 0);
        assert_eq!(h.store.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_product_with_empty_tags_clears_edges() {
        let store = MockStorage::new();
        store.insert_user(user("u", &["a"])).unwrap();
        let h = harness(store);
        send_product(&h, "product_create", 1, &["a"]).await.unwrap();

        send_product(&h, "product_update", 1, &[]).await.unwrap();
        assert_eq!(h.store.edge_count(), 0);
    }

    #[tokio::test]
    async fn test_invalidation_can_be_switched_off() {
        let store = MockStorage::new();
        store.insert_user(user("u", &["a"])).unwrap();
        let h = harness_with(store, ProcessorConfig::default().with_product_invalidation(false));
        let uid = UserUid::new("u");
        h.cache.put(&uid, &[]).await.unwrap();

        let outcome = send_product(&h, "product_create", 1, &["a"]).await.unwrap();

        assert!(matches!(outcome, Outcome::ProductRebuilt { invalidated: 0, .. }));
        assert_eq!(h.cache.get(&uid).await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn test_delete_cascades_and_invalidates_holders() {
        let store = MockStorage::new();
        store.insert_user(user("u1", &["a"])).unwrap();
        store.insert_user(user("u2", &["a"])).unwrap();
        let h = harness(store);
        send_product(&h, "product_create", 1, &["a"]).await.unwrap();
        h.cache.put(&UserUid::new("u1"), &[ProductId(1)]).await.unwrap();

        let outcome = send_product(&h, "product_delete", 1, &[]).await.unwrap();

        assert_eq!(outcome, Outcome::ProductDeleted { invalidated: 2 });
        assert_eq!(h.store.product_count(), 0);
        assert_eq!(h.store.edge_count(), 0);
        assert!(h.backend.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_product_is_noop() {
        let h = harness(MockStorage::new());
        let outcome = send_product(&h, "product_delete", 9, &[]).await.unwrap();
        assert_eq!(outcome, Outcome::ProductDeleted { invalidated: 0 });
    }

    #[tokio::test]
    async fn test_view_increments_and_unknown_view_is_ignored() {
        let store = MockStorage::new();
        store.insert_product(product(1, &["a"], 4)).unwrap();
        let h = harness(store);

        assert_eq!(
            send_product(&h, "view_products", 1, &[]).await.unwrap(),
            Outcome::PopularityIncremented
        );
        assert_eq!(h.store.popularity(ProductId(1)), Some(5));
        assert_eq!(
            send_product(&h, "view_products", 2, &[]).await.unwrap(),
            Outcome::Ignored { reason: IgnoreReason::UnknownProduct }
        );
    }

    #[tokio::test]
    async fn test_unknown_action_is_ignored() {
        let h = harness(MockStorage::new());
        let outcome = send_product(&h, "restock", 1, &[]).await.unwrap();
        assert_eq!(outcome, Outcome::Ignored { reason: IgnoreReason::UnknownAction });
    }

    #[tokio::test]
    async fn test_storage_failure_is_transient() {
        let store = MockStorage::new();
        let h = harness(store);
        h.store.set_unavailable(true);

        let err = send_user(&h, "u1", &["a"]).await.unwrap_err();
        assert!(matches!(err, EventError::Storage(StorageError::Backend { .. })));
        assert!(!err.is_poison());
    }

    #[tokio::test]
    async fn test_cache_invalidation_failure_fails_the_event() {
        use recsys_storage::{CacheBackend, CacheStats};
        use std::time::Duration;

        struct BrokenBackend;

        #[async_trait::async_trait]
        impl CacheBackend for BrokenBackend {
            async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
                Err(CacheError::backend("down"))
            }
            async fn set(&self, _k: &str, _v: &[u8], _ttl: Duration) -> Result<(), CacheError> {
                Err(CacheError::backend("down"))
            }
            async fn delete(&self, _key: &str) -> Result<(), CacheError> {
                Err(CacheError::backend("down"))
            }
            async fn stats(&self) -> Result<CacheStats, CacheError> {
                Ok(CacheStats::default())
            }
            fn name(&self) -> &'static str {
                "broken"
            }
        }

        let store = MockStorage::new();
        let cache = RecommendationCache::new(Arc::new(BrokenBackend), CacheConfig::default());
        let processor =
            EventProcessor::new(Arc::new(store.clone()), cache, ProcessorConfig::default());

        let (key, body) = user_message("u1", &["a"]);
        let err = processor
            .handle_message(Topic::User, &key, &body)
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Cache(_)));
        assert!(!err.is_poison());
        // The store write landed; a redelivery reapplies it idempotently.
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn test_decoded_event_can_be_handled_directly() {
        let h = harness(MockStorage::new());
        let event = DomainEvent {
            topic: Topic::Product,
            key: "3".to_string(),
            action: "product_create".to_string(),
            occurred_at: recsys_test_utils::fixtures::event_time(),
            tags: tag_set(["a"]),
            kind: EventKind::ProductCreated {
                id: ProductId(3),
                tags: tag_set(["a"]),
            },
        };
        assert!(!h.processor.handle(&event).await.unwrap().is_ignored());
        assert_eq!(h.store.product_count(), 1);
    }
}
