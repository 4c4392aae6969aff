//! Event-to-query scenarios over the in-memory store and cache.

use std::sync::Arc;
use std::time::Duration;

use recsys_core::{ProductId, Topic, UserUid};
use recsys_engine::{
    ConsumerConfig, ConsumerRuntime, EventProcessor, EventSource, InMemoryDeadLetterSink,
    InMemoryEventBus, Outcome, ProcessorConfig, QueryService, ReadSource,
};
use recsys_storage::{CacheConfig, InMemoryCacheBackend, MockStorage, RecommendationCache};
use recsys_test_utils::assertions::{assert_edges_follow_rule, assert_poison};
use recsys_test_utils::fixtures::{product_message, user_message};

struct Engine {
    store: MockStorage,
    processor: EventProcessor,
    query: QueryService,
}

impl Engine {
    fn new() -> Self {
        let store = MockStorage::new();
        let cache = RecommendationCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            CacheConfig::default().with_ttl(Duration::from_secs(60)),
        );
        let processor = EventProcessor::new(
            Arc::new(store.clone()),
            cache.clone(),
            ProcessorConfig::default().with_user_page_size(3),
        );
        let query = QueryService::new(Arc::new(store.clone()), cache);
        Self {
            store,
            processor,
            query,
        }
    }

    async fn product(&self, action: &str, id: i64, tags: &[&str]) -> Outcome {
        let (key, body) = product_message(action, id, tags);
        self.processor
            .handle_message(Topic::Product, &key, &body)
            .await
            .unwrap()
    }

    async fn user(&self, uid: &str, tags: &[&str]) -> Outcome {
        let (key, body) = user_message(uid, tags);
        self.processor
            .handle_message(Topic::User, &key, &body)
            .await
            .unwrap()
    }

    async fn recommendations(&self, uid: &str) -> Vec<ProductId> {
        self.query
            .get_recommendations(&UserUid::new(uid))
            .await
            .unwrap()
            .products
    }
}

#[tokio::test]
async fn test_created_product_is_recommended_to_new_user() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["music"]).await;
    engine.user("U1", &["music"]).await;

    assert_eq!(engine.recommendations("U1").await, vec![ProductId(1)]);
}

#[tokio::test]
async fn test_retagged_product_drops_out_even_when_cached() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["music"]).await;
    engine.user("U1", &["music"]).await;
    // Warm the cache before the product changes.
    assert_eq!(engine.recommendations("U1").await, vec![ProductId(1)]);

    engine.product("product_update", 1, &["sports"]).await;

    assert!(engine.recommendations("U1").await.is_empty());
    assert_edges_follow_rule(&engine.store).await;
}

#[tokio::test]
async fn test_results_ordered_by_popularity() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["tech"]).await;
    engine.product("product_create", 2, &["tech"]).await;
    for _ in 0..5 {
        engine.product("view_products", 1, &[]).await;
    }
    for _ in 0..9 {
        engine.product("view_products", 2, &[]).await;
    }
    engine.user("U", &["tech"]).await;

    assert_eq!(engine.recommendations("U").await, vec![ProductId(2), ProductId(1)]);
}

#[tokio::test]
async fn test_equal_popularity_breaks_ties_by_product_id() {
    let engine = Engine::new();
    for id in [30, 10, 20] {
        engine.product("product_create", id, &["tech"]).await;
    }
    engine.user("U", &["tech"]).await;

    assert_eq!(
        engine.recommendations("U").await,
        vec![ProductId(10), ProductId(20), ProductId(30)]
    );
}

#[tokio::test]
async fn test_views_change_popularity_only() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["a"]).await;
    engine.user("U1", &["a"]).await;
    let edges_before = engine.store.all_edges();

    for _ in 0..3 {
        assert_eq!(
            engine.product("view_products", 1, &[]).await,
            Outcome::PopularityIncremented
        );
    }

    assert_eq!(engine.store.popularity(ProductId(1)), Some(3));
    assert_eq!(engine.store.all_edges(), edges_before);
}

#[tokio::test]
async fn test_repeated_user_update_is_idempotent() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["a"]).await;
    engine.product("product_create", 2, &["b"]).await;

    engine.user("U1", &["a", "b"]).await;
    let once = engine.store.all_edges();
    engine.user("U1", &["a", "b"]).await;

    assert_eq!(engine.store.all_edges(), once);
    assert_eq!(engine.store.edge_count(), 2);
}

#[tokio::test]
async fn test_repeated_product_update_is_idempotent() {
    let engine = Engine::new();
    engine.user("U1", &["a"]).await;
    engine.user("U2", &["b"]).await;
    engine.product("product_create", 1, &["a"]).await;

    engine.product("product_update", 1, &["a", "b"]).await;
    let once = engine.store.all_edges();
    engine.product("product_update", 1, &["a", "b"]).await;

    assert_eq!(engine.store.all_edges(), once);
    assert_eq!(engine.store.edge_count(), 2);
}

#[tokio::test]
async fn test_malformed_payload_changes_nothing() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["a"]).await;
    let edges = engine.store.all_edges();

    let result = engine
        .processor
        .handle_message(Topic::Product, b"1", b"{\"action\": \"product_delete\"")
        .await;

    assert_poison(&result);
    assert_eq!(engine.store.product_count(), 1);
    assert_eq!(engine.store.all_edges(), edges);
}

#[tokio::test]
async fn test_delete_cascades_to_every_holder() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["a"]).await;
    engine.product("product_create", 2, &["a"]).await;
    for uid in ["U1", "U2", "U3", "U4"] {
        engine.user(uid, &["a"]).await;
        assert_eq!(engine.recommendations(uid).await.len(), 2);
    }

    assert_eq!(
        engine.product("product_delete", 1, &[]).await,
        Outcome::ProductDeleted { invalidated: 4 }
    );

    for uid in ["U1", "U2", "U3", "U4"] {
        assert_eq!(engine.recommendations(uid).await, vec![ProductId(2)]);
    }
    assert_edges_follow_rule(&engine.store).await;
}

#[tokio::test]
async fn test_repeated_read_matches_store() {
    let engine = Engine::new();
    engine.product("product_create", 1, &["a"]).await;
    engine.product("product_create", 2, &["a", "b"]).await;
    engine.product("view_products", 2, &[]).await;
    engine.user("U", &["b", "a"]).await;

    let uid = UserUid::new("U");
    let first = engine.query.get_recommendations(&uid).await.unwrap();
    let second = engine.query.get_recommendations(&uid).await.unwrap();

    assert_eq!(first.source, ReadSource::Store);
    assert_eq!(second.source, ReadSource::Cache);
    assert_eq!(first.products, second.products);
}

#[tokio::test]
async fn test_events_through_bus_reach_query() {
    let engine = Engine::new();
    let mut bus = InMemoryEventBus::new(64);
    let publisher = bus.publisher();
    let sources = bus
        .take_all_sources()
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn EventSource>)
        .collect();
    let sink = Arc::new(InMemoryDeadLetterSink::new());
    let runtime = ConsumerRuntime::spawn(
        sources,
        Arc::new(engine.processor.clone()),
        sink.clone(),
        ConsumerConfig::development(),
    );

    let (key, body) = product_message("product_create", 7, &["music"]);
    publisher.publish(Topic::Product, key, body).await.unwrap();
    publisher
        .publish(Topic::Product, "7", "this is not json")
        .await
        .unwrap();
    let (key, body) = product_message("view_products", 7, &[]);
    publisher.publish(Topic::Product, key, body).await.unwrap();

    for _ in 0..400 {
        if engine.store.popularity(ProductId(7)) == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // The user topic has no ordering relative to the product topic; publish the
    // user only once the product is in place.
    let (key, body) = user_message("U1", &["music"]);
    publisher.publish(Topic::User, key, body).await.unwrap();
    for _ in 0..400 {
        if engine.store.edge_count() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let finals = runtime.shutdown().await;

    assert_eq!(engine.recommendations("U1").await, vec![ProductId(7)]);
    assert_eq!(sink.len(), 1);
    let dead: u64 = finals.iter().map(|(_, s)| s.dead_lettered).sum();
    assert_eq!(dead, 1);
}
