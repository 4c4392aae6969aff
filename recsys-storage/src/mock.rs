//! In-memory store used by tests and single-process deployments.
//!
//! All state sits behind one lock, so every trait method is atomic with respect to every
//! other, which gives the same visibility as the transactional Postgres store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use recsys_core::{
    compute_candidates, interests_match, Product, ProductId, StorageError, StorageResult, TagIndex,
    TagSet, User, UserUid,
};

use crate::store::{CatalogStore, ProductEdges, RecommendationStore, ReplaceOutcome};

#[derive(Debug, Default)]
struct Inner {
    users: BTreeMap<UserUid, TagSet>,
    products: BTreeMap<ProductId, Product>,
    edges: BTreeSet<(UserUid, ProductId)>,
}

/// Mock storage implementation for testing.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    inner: Arc<RwLock<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a backend error until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::backend("mock storage unavailable"));
        }
        Ok(())
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, Inner>> {
        self.check_available()?;
        self.inner.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.check_available()?;
        self.inner.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Seed a product directly, bypassing the event flow.
    pub fn insert_product(&self, product: Product) -> StorageResult<()> {
        let mut inner = self.write()?;
        if inner.products.contains_key(&product.id) {
            return Err(StorageError::InsertFailed {
                entity: recsys_core::EntityKind::Product,
                reason: format!("product {} already exists", product.id),
            });
        }
        inner.products.insert(product.id, product);
        Ok(())
    }

    /// Seed a user directly, bypassing the event flow.
    pub fn insert_user(&self, user: User) -> StorageResult<()> {
        let mut inner = self.write()?;
        if inner.users.contains_key(&user.uid) {
            return Err(StorageError::InsertFailed {
                entity: recsys_core::EntityKind::User,
                reason: format!("user {} already exists", user.uid),
            });
        }
        inner.users.insert(user.uid, user.interests);
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.inner.read().map(|i| i.users.len()).unwrap_or(0)
    }

    pub fn product_count(&self) -> usize {
        self.inner.read().map(|i| i.products.len()).unwrap_or(0)
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().map(|i| i.edges.len()).unwrap_or(0)
    }

    /// Edge set for a user, unordered.
    pub fn edges_for_user(&self, uid: &UserUid) -> BTreeSet<ProductId> {
        self.inner
            .read()
            .map(|i| {
                i.edges
                    .iter()
                    .filter(|(u, _)| u == uid)
                    .map(|(_, p)| *p)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn popularity(&self, id: ProductId) -> Option<i64> {
        self.inner
            .read()
            .ok()
            .and_then(|i| i.products.get(&id).map(|p| p.popularity))
    }

    /// Full edge set, for whole-state comparisons in tests.
    pub fn all_edges(&self) -> BTreeSet<(UserUid, ProductId)> {
        self.inner
            .read()
            .map(|i| i.edges.clone())
            .unwrap_or_default()
    }
}

impl Inner {
    fn holders_of(&self, product: ProductId) -> BTreeSet<UserUid> {
        self.edges
            .iter()
            .filter(|(_, p)| *p == product)
            .map(|(u, _)| u.clone())
            .collect()
    }
}

#[async_trait]
impl CatalogStore for MockStorage {
    async fn get_user(&self, uid: &UserUid) -> StorageResult<Option<User>> {
        let inner = self.read()?;
        Ok(inner
            .users
            .get(uid)
            .map(|interests| User::new(uid.clone(), interests.clone())))
    }

    async fn list_users(&self, after: Option<&UserUid>, limit: usize) -> StorageResult<Vec<User>> {
        use std::ops::Bound;

        let inner = self.read()?;
        let lower = match after {
            Some(uid) => Bound::Excluded(uid.clone()),
            None => Bound::Unbounded,
        };
        Ok(inner
            .users
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(uid, interests)| User::new(uid.clone(), interests.clone()))
            .collect())
    }

    async fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>> {
        Ok(self.read()?.products.get(&id).cloned())
    }

    async fn products_with_any_tag(&self, tags: &TagSet) -> StorageResult<Vec<Product>> {
        let inner = self.read()?;
        Ok(inner
            .products
            .values()
            .filter(|p| interests_match(tags, &p.tags))
            .cloned()
            .collect())
    }

    async fn upsert_product(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
        let mut inner = self.write()?;
        match inner.products.get_mut(&id) {
            Some(existing) => {
                existing.tags = tags.clone();
                Ok(false)
            }
            None => {
                inner.products.insert(id, Product::new(id, tags.clone()));
                Ok(true)
            }
        }
    }

    async fn update_product_tags(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
        let mut inner = self.write()?;
        match inner.products.get_mut(&id) {
            Some(existing) => {
                existing.tags = tags.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_product(&self, id: ProductId) -> StorageResult<Option<BTreeSet<UserUid>>> {
        let mut inner = self.write()?;
        if inner.products.remove(&id).is_none() {
            return Ok(None);
        }
        let holders = inner.holders_of(id);
        inner.edges.retain(|(_, p)| *p != id);
        Ok(Some(holders))
    }

    async fn increment_popularity(&self, id: ProductId) -> StorageResult<bool> {
        let mut inner = self.write()?;
        match inner.products.get_mut(&id) {
            Some(product) => {
                product.popularity += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.read().map(|_| ())
    }
}

#[async_trait]
impl RecommendationStore for MockStorage {
    async fn rebuild_user_recommendations(&self, user: &User) -> StorageResult<ReplaceOutcome> {
        let mut inner = self.write()?;
        inner.users.insert(user.uid.clone(), user.interests.clone());

        let before = inner.edges.len();
        inner.edges.retain(|(u, _)| u != &user.uid);
        let removed = (before - inner.edges.len()) as u64;

        let candidates =
            compute_candidates(&user.interests, &TagIndex::from_products(inner.products.values()));
        let mut inserted = 0;
        for product in candidates {
            if inner.edges.insert((user.uid.clone(), product)) {
                inserted += 1;
            }
        }
        Ok(ReplaceOutcome { removed, inserted })
    }

    async fn rebuild_product_recommendations(
        &self,
        product: ProductId,
        _page_size: usize,
    ) -> StorageResult<ProductEdges> {
        let mut inner = self.write()?;
        let previous = inner.holders_of(product);
        inner.edges.retain(|(_, p)| *p != product);

        let current: BTreeSet<UserUid> = match inner.products.get(&product) {
            Some(stored) => inner
                .users
                .iter()
                .filter(|(_, interests)| interests_match(interests, &stored.tags))
                .map(|(uid, _)| uid.clone())
                .collect(),
            None => BTreeSet::new(),
        };
        for uid in &current {
            inner.edges.insert((uid.clone(), product));
        }
        Ok(ProductEdges { previous, current })
    }

    async fn recommendations_for_user(&self, uid: &UserUid) -> StorageResult<Vec<ProductId>> {
        let inner = self.read()?;
        let mut rows: Vec<&Product> = inner
            .edges
            .iter()
            .filter(|(u, _)| u == uid)
            .filter_map(|(_, p)| inner.products.get(p))
            .collect();
        rows.sort_by(|a, b| b.popularity.cmp(&a.popularity).then(a.id.cmp(&b.id)));
        Ok(rows.into_iter().map(|p| p.id).collect())
    }

    async fn users_for_product(&self, product: ProductId) -> StorageResult<BTreeSet<UserUid>> {
        Ok(self.read()?.holders_of(product))
    }
}
