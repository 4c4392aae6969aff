//! Property tests: whatever order events arrive in, the edge set converges to the
//! interest/tag rule and reads come back in popularity order.

use std::collections::BTreeSet;
use std::sync::Arc;

use proptest::prelude::*;
use recsys_core::{interests_match, Product, Topic, User, UserUid, ACTION_PRODUCT_CREATE};
use recsys_engine::{EventProcessor, ProcessorConfig, QueryService};
use recsys_storage::{CacheConfig, InMemoryCacheBackend, MockStorage, RecommendationCache};
use recsys_test_utils::assertions::assert_edges_follow_rule;
use recsys_test_utils::fixtures::{payload, product_message};
use recsys_test_utils::generators::{arb_catalog, arb_users};

#[derive(Debug, Clone)]
enum Step {
    Product(Product),
    User(User),
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn engine(page_size: usize) -> (MockStorage, EventProcessor, QueryService) {
    let store = MockStorage::new();
    let cache = RecommendationCache::new(
        Arc::new(InMemoryCacheBackend::new()),
        CacheConfig::default(),
    );
    let processor = EventProcessor::new(
        Arc::new(store.clone()),
        cache.clone(),
        ProcessorConfig::default().with_user_page_size(page_size),
    );
    let query = QueryService::new(Arc::new(store.clone()), cache);
    (store, processor, query)
}

async fn apply(processor: &EventProcessor, step: &Step) {
    match step {
        Step::Product(p) => {
            let tags: Vec<&str> = p.tags.iter().map(String::as_str).collect();
            let (key, body) = product_message(ACTION_PRODUCT_CREATE, p.id.as_i64(), &tags);
            processor
                .handle_message(Topic::Product, &key, &body)
                .await
                .unwrap();
        }
        Step::User(u) => {
            let tags: Vec<&str> = u.interests.iter().map(String::as_str).collect();
            let body = payload("user_update", &tags);
            processor
                .handle_message(Topic::User, u.uid.as_str().as_bytes(), &body)
                .await
                .unwrap();
        }
    }
}

/// Catalog and users interleaved in a shuffled order.
fn arb_steps() -> impl Strategy<Value = (Vec<Product>, Vec<User>, Vec<Step>)> {
    (arb_catalog(12), arb_users(8)).prop_flat_map(|(catalog, users)| {
        let steps: Vec<Step> = catalog
            .iter()
            .cloned()
            .map(Step::Product)
            .chain(users.iter().cloned().map(Step::User))
            .collect();
        (Just(catalog), Just(users), Just(steps).prop_shuffle())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_edges_converge_in_any_order(
        (catalog, users, steps) in arb_steps(),
        page_size in 1usize..5,
    ) {
        let rt = runtime();
        rt.block_on(async {
            let (store, processor, query) = engine(page_size);
            for step in &steps {
                apply(&processor, step).await;
            }

            assert_edges_follow_rule(&store).await;

            for user in &users {
                let read = query.get_recommendations(&user.uid).await.unwrap();
                let got: BTreeSet<_> = read.products.iter().copied().collect();
                let expected: BTreeSet<_> = catalog
                    .iter()
                    .filter(|p| interests_match(&user.interests, &p.tags))
                    .map(|p| p.id)
                    .collect();
                prop_assert_eq!(got, expected);
                prop_assert_eq!(read.products.len(), expected_len(&catalog, user));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_replaying_every_event_is_idempotent((_, _, steps) in arb_steps()) {
        let rt = runtime();
        rt.block_on(async {
            let (store, processor, _) = engine(2);
            for step in &steps {
                apply(&processor, step).await;
            }
            let once = store.all_edges();
            for step in &steps {
                apply(&processor, step).await;
            }
            prop_assert_eq!(store.all_edges(), once);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_reads_sorted_by_popularity_then_id(
        views in proptest::collection::vec((1i64..5, 0usize..4), 0..20),
    ) {
        let rt = runtime();
        rt.block_on(async {
            let (store, processor, query) = engine(10);
            for id in 1..5 {
                let (key, body) = product_message(ACTION_PRODUCT_CREATE, id, &["x"]);
                processor.handle_message(Topic::Product, &key, &body).await.unwrap();
            }
            for (id, times) in &views {
                for _ in 0..*times {
                    let (key, body) = product_message("view_products", *id, &[]);
                    processor.handle_message(Topic::Product, &key, &body).await.unwrap();
                }
            }
            let body = payload("user_update", &["x"]);
            processor.handle_message(Topic::User, b"viewer", &body).await.unwrap();

            let read = query.get_recommendations(&UserUid::new("viewer")).await.unwrap();
            let ranked: Vec<(i64, i64)> = read
                .products
                .iter()
                .map(|id| (store.popularity(*id).unwrap_or_default(), id.as_i64()))
                .collect();
            for pair in ranked.windows(2) {
                let ((pop_a, id_a), (pop_b, id_b)) = (pair[0], pair[1]);
                prop_assert!(pop_a > pop_b || (pop_a == pop_b && id_a < id_b));
            }
            prop_assert_eq!(ranked.len(), 4);
            Ok::<(), TestCaseError>(())
        })?;
    }
}

fn expected_len(catalog: &[Product], user: &User) -> usize {
    catalog
        .iter()
        .filter(|p| interests_match(&user.interests, &p.tags))
        .count()
}
