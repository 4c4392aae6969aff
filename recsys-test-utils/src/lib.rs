//! RECSYS Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for catalogs and users
//! - Fixtures that build wire messages and seeded stores
//! - Assertions over the whole recommendation edge set

// Re-export mock storage from its source crate
pub use recsys_storage::MockStorage;

// Re-export core types for convenience
pub use recsys_core::{
    interests_match, tag_set, EventError, EventPayload, Product, ProductId, TagSet, Topic, User,
    UserUid,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies over a deliberately small tag vocabulary, so random
    //! users and products overlap often enough to produce edges.

    use super::*;
    use proptest::collection::{btree_map, btree_set};
    use proptest::prelude::*;

    pub const TAG_VOCABULARY: [&str; 6] = ["books", "games", "garden", "music", "sports", "tools"];

    pub fn arb_tag() -> impl Strategy<Value = String> {
        proptest::sample::select(TAG_VOCABULARY.to_vec()).prop_map(str::to_string)
    }

    /// Zero to four tags.
    pub fn arb_tag_set() -> impl Strategy<Value = TagSet> {
        btree_set(arb_tag(), 0..=4)
    }

    pub fn arb_product_id() -> impl Strategy<Value = ProductId> {
        (1i64..10_000).prop_map(ProductId)
    }

    pub fn arb_user_uid() -> impl Strategy<Value = UserUid> {
        "[a-z][a-z0-9]{0,7}".prop_map(UserUid::new)
    }

    pub fn arb_product() -> impl Strategy<Value = Product> {
        (arb_product_id(), arb_tag_set(), 0i64..1_000)
            .prop_map(|(id, tags, popularity)| Product::new(id, tags).with_popularity(popularity))
    }

    pub fn arb_user() -> impl Strategy<Value = User> {
        (arb_user_uid(), arb_tag_set()).prop_map(|(uid, interests)| User::new(uid, interests))
    }

    /// Products with distinct ids.
    pub fn arb_catalog(max: usize) -> impl Strategy<Value = Vec<Product>> {
        btree_map(arb_product_id(), (arb_tag_set(), 0i64..1_000), 0..=max).prop_map(|m| {
            m.into_iter()
                .map(|(id, (tags, popularity))| Product::new(id, tags).with_popularity(popularity))
                .collect()
        })
    }

    /// Users with distinct uids.
    pub fn arb_users(max: usize) -> impl Strategy<Value = Vec<User>> {
        btree_map(arb_user_uid(), arb_tag_set(), 0..=max)
            .prop_map(|m| m.into_iter().map(|(uid, tags)| User::new(uid, tags)).collect())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built messages and stores for common scenarios.

    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    /// Fixed event time so fixtures are reproducible.
    pub fn event_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// JSON payload bytes for `action` with `tags`.
    pub fn payload(action: &str, tags: &[&str]) -> Vec<u8> {
        serde_json::to_vec(&EventPayload::new(action, event_time(), tags.iter().copied()))
            .unwrap_or_default()
    }

    /// `(key, payload)` for a product-topic message.
    pub fn product_message(action: &str, id: i64, tags: &[&str]) -> (Vec<u8>, Vec<u8>) {
        (id.to_string().into_bytes(), payload(action, tags))
    }

    /// `(key, payload)` for a `user_update` message.
    pub fn user_message(uid: &str, interests: &[&str]) -> (Vec<u8>, Vec<u8>) {
        (
            uid.as_bytes().to_vec(),
            payload(recsys_core::ACTION_USER_UPDATE, interests),
        )
    }

    pub fn product(id: i64, tags: &[&str], popularity: i64) -> Product {
        Product::new(ProductId(id), tag_set(tags.iter().copied())).with_popularity(popularity)
    }

    pub fn user(uid: &str, interests: &[&str]) -> User {
        User::new(uid, tag_set(interests.iter().copied()))
    }

    /// A store holding `products` and `users` with no edges yet.
    pub fn seeded_store(products: &[Product], users: &[User]) -> MockStorage {
        let store = MockStorage::new();
        for p in products {
            let _ = store.insert_product(p.clone());
        }
        for u in users {
            let _ = store.insert_user(u.clone());
        }
        store
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Whole-state checks used by engine and API tests.

    use super::*;
    use recsys_storage::{CatalogStore, RecommendationStore};
    use std::collections::BTreeSet;

    /// Assert that an event error will be dead-lettered rather than retried.
    #[track_caller]
    pub fn assert_poison<T: std::fmt::Debug>(result: &Result<T, EventError>) {
        match result {
            Err(e) if e.is_poison() => {}
            other => panic!("Expected poison error, got: {:?}", other),
        }
    }

    /// Assert that an event error will be retried.
    #[track_caller]
    pub fn assert_transient<T: std::fmt::Debug>(result: &Result<T, EventError>) {
        match result {
            Err(e) if !e.is_poison() => {}
            other => panic!("Expected transient error, got: {:?}", other),
        }
    }

    /// Assert that the store's edge set is exactly
    /// `{(u, p) | u.interests ∩ p.tags ≠ ∅}` over every stored user and product.
    pub async fn assert_edges_follow_rule(store: &MockStorage) {
        let users = store
            .list_users(None, usize::MAX)
            .await
            .unwrap_or_else(|e| panic!("list_users failed: {}", e));

        let mut expected = BTreeSet::new();
        for user in &users {
            let products = store
                .products_with_any_tag(&user.interests)
                .await
                .unwrap_or_else(|e| panic!("products_with_any_tag failed: {}", e));
            for product in products {
                if interests_match(&user.interests, &product.tags) {
                    expected.insert((user.uid.clone(), product.id));
                }
            }
        }

        let actual = store.all_edges();
        assert_eq!(
            actual, expected,
            "edge set diverged from the interest/tag rule"
        );

        for (uid, id) in &actual {
            let held = store
                .users_for_product(*id)
                .await
                .unwrap_or_else(|e| panic!("users_for_product failed: {}", e));
            assert!(held.contains(uid), "edge ({}, {}) not visible per product", uid, id);
        }
    }
}
