//! Async store traits for the catalog and the recommendation edge set.

use std::collections::BTreeSet;

use async_trait::async_trait;
use recsys_core::{Product, ProductId, StorageResult, TagSet, User, UserUid};

/// Row counts touched by an edge replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Edges removed before recomputing.
    pub removed: u64,
    /// Edges inserted by the recompute.
    pub inserted: u64,
}

/// Durable product and user records.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Fetch a user and their interests, or `None` for a uid never seen.
    async fn get_user(&self, uid: &UserUid) -> StorageResult<Option<User>>;

    /// Page through users ordered by uid, starting strictly after `after`.
    async fn list_users(&self, after: Option<&UserUid>, limit: usize) -> StorageResult<Vec<User>>;

    async fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>>;

    /// Products carrying at least one of `tags`.
    async fn products_with_any_tag(&self, tags: &TagSet) -> StorageResult<Vec<Product>>;

    /// Insert a product with zero popularity.
    ///
    /// Replaying the insert for an existing id replaces its tags and keeps its popularity.
    /// Returns `true` when the row was newly created.
    async fn upsert_product(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool>;

    /// Replace a product's tags. Returns `false` if the product does not exist.
    async fn update_product_tags(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool>;

    /// Delete a product and every edge referencing it, atomically.
    ///
    /// Returns the users that held an edge to it, or `None` if the product did not exist.
    async fn delete_product(&self, id: ProductId) -> StorageResult<Option<BTreeSet<UserUid>>>;

    /// Add one to a product's popularity. Returns `false` if the product does not exist.
    async fn increment_popularity(&self, id: ProductId) -> StorageResult<bool>;

    /// Cheap round trip proving the store is reachable.
    async fn health_check(&self) -> StorageResult<()>;
}

/// User sets on either side of a product's edge rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductEdges {
    /// Users that held an edge to the product before the rebuild.
    pub previous: BTreeSet<UserUid>,
    /// Users holding an edge to the product after the rebuild.
    pub current: BTreeSet<UserUid>,
}

/// Durable `(user, product)` edges.
///
/// Both rebuilds read their matching inputs inside the same critical section that
/// replaces the edges, and no two rebuilds (or a rebuild and a product delete) overlap.
/// A user rebuild racing a product rebuild therefore always sees the other's committed
/// write, whichever runs second.
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    /// Atomically: upsert the user with `user.interests`, delete all of the user's edges,
    /// then insert one edge per stored product whose tags intersect the interests.
    async fn rebuild_user_recommendations(&self, user: &User) -> StorageResult<ReplaceOutcome>;

    /// Atomically: delete all edges for `product`, then scan users `page_size` at a time in
    /// uid order and insert an edge for each whose interests intersect the product's
    /// stored tags. A product that no longer exists ends with no edges.
    async fn rebuild_product_recommendations(
        &self,
        product: ProductId,
        page_size: usize,
    ) -> StorageResult<ProductEdges>;

    /// The user's recommended products, `popularity DESC, product_id ASC`.
    async fn recommendations_for_user(&self, uid: &UserUid) -> StorageResult<Vec<ProductId>>;

    /// Users currently holding an edge to `product`.
    async fn users_for_product(&self, product: ProductId) -> StorageResult<BTreeSet<UserUid>>;
}

/// Everything the engine needs from durable storage.
pub trait Store: CatalogStore + RecommendationStore {}

impl<T> Store for T where T: CatalogStore + RecommendationStore {}
