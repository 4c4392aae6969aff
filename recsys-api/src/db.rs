//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, and [`PgStore`], the durable
//! implementation of the catalog and recommendation store traits.
//!
//! Each edge rebuild runs in one transaction, so a concurrent reader sees either the old
//! edge set or the new one, never an empty gap between them. Rebuilds and product deletes
//! also take [`EDGE_REBUILD_LOCK`] first and read their matching inputs after it, so a user
//! rebuild and a product rebuild racing on different workers cannot both miss each other.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use recsys_core::{
    compute_candidates, interests_match, Product, ProductId, StorageError, StorageResult, TagIndex,
    TagSet, User, UserUid,
};
use recsys_storage::{CatalogStore, ProductEdges, RecommendationStore, ReplaceOutcome};
use tokio_postgres::NoTls;

use crate::constants::{DEFAULT_DB_CONNECT_TIMEOUT_MS, DEFAULT_DB_POOL_SIZE};
use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// How long to wait for a pooled connection
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "recsys".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: DEFAULT_DB_POOL_SIZE,
            timeout: Duration::from_millis(DEFAULT_DB_CONNECT_TIMEOUT_MS),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("RECSYS_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("RECSYS_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("RECSYS_DB_NAME").unwrap_or_else(|_| "recsys".to_string()),
            user: std::env::var("RECSYS_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("RECSYS_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("RECSYS_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DB_POOL_SIZE),
            timeout: Duration::from_millis(
                std::env::var("RECSYS_DB_CONNECT_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_DB_CONNECT_TIMEOUT_MS),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        pool_cfg.timeouts.create = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::internal_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Tables and indexes, created idempotently at startup.
///
/// `user_uid` uses the C collation so keyset pagination over users follows byte order.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_uid   TEXT COLLATE "C" PRIMARY KEY,
    interests  TEXT[] NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS products (
    product_id BIGINT PRIMARY KEY,
    tags       TEXT[] NOT NULL DEFAULT '{}',
    popularity BIGINT NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS recommendations (
    user_uid   TEXT COLLATE "C" NOT NULL REFERENCES users (user_uid) ON DELETE CASCADE,
    product_id BIGINT NOT NULL REFERENCES products (product_id) ON DELETE CASCADE,
    PRIMARY KEY (user_uid, product_id)
);

CREATE INDEX IF NOT EXISTS products_tags_gin ON products USING GIN (tags);
CREATE INDEX IF NOT EXISTS recommendations_product_idx ON recommendations (product_id);
"#;

// ============================================================================
// POSTGRES STORE
// ============================================================================

fn pool_err(e: deadpool_postgres::PoolError) -> StorageError {
    StorageError::backend(format!("connection pool: {}", e))
}

fn pg_err(e: tokio_postgres::Error) -> StorageError {
    StorageError::backend(e.to_string())
}

fn txn_err(e: tokio_postgres::Error) -> StorageError {
    StorageError::TransactionFailed {
        reason: e.to_string(),
    }
}

fn tags_param(tags: &TagSet) -> Vec<String> {
    tags.iter().cloned().collect()
}

fn row_to_user(row: &tokio_postgres::Row) -> User {
    let uid: String = row.get("user_uid");
    let interests: Vec<String> = row.get("interests");
    User::new(uid, interests.into_iter().collect())
}

fn row_to_product(row: &tokio_postgres::Row) -> Product {
    let id: i64 = row.get("product_id");
    let tags: Vec<String> = row.get("tags");
    let popularity: i64 = row.get("popularity");
    Product::new(ProductId(id), tags.into_iter().collect()).with_popularity(popularity)
}

/// Session-independent advisory lock key held by every edge rebuild and product delete
/// until its transaction ends.
pub const EDGE_REBUILD_LOCK: i64 = 0x7265_6373_7973;

async fn lock_edges(tx: &tokio_postgres::Transaction<'_>) -> StorageResult<()> {
    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&EDGE_REBUILD_LOCK])
        .await
        .map_err(txn_err)?;
    Ok(())
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("PgStore")
            .field("pool_size", &status.size)
            .field("pool_available", &status.available)
            .finish()
    }
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool, prove the database is reachable and create the schema.
    /// Any failure here is fatal for the process.
    pub async fn connect(config: &DbConfig) -> ApiResult<Self> {
        let store = Self::new(config.create_pool()?);
        let conn = store.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            max_size = config.max_size,
            "Connected to PostgreSQL, schema ensured"
        );
        Ok(store)
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> StorageResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_err)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_user(&self, uid: &UserUid) -> StorageResult<Option<User>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_uid, interests FROM users WHERE user_uid = $1",
                &[&uid.as_str()],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn list_users(&self, after: Option<&UserUid>, limit: usize) -> StorageResult<Vec<User>> {
        let conn = self.get_conn().await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match after {
            Some(after) => {
                conn.query(
                    "SELECT user_uid, interests FROM users WHERE user_uid > $1 \
                     ORDER BY user_uid LIMIT $2",
                    &[&after.as_str(), &limit],
                )
                .await
            }
            None => {
                conn.query(
                    "SELECT user_uid, interests FROM users ORDER BY user_uid LIMIT $1",
                    &[&limit],
                )
                .await
            }
        }
        .map_err(pg_err)?;
        Ok(rows.iter().map(row_to_user).collect())
    }

    async fn get_product(&self, id: ProductId) -> StorageResult<Option<Product>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                "SELECT product_id, tags, popularity FROM products WHERE product_id = $1",
                &[&id.as_i64()],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.as_ref().map(row_to_product))
    }

    async fn products_with_any_tag(&self, tags: &TagSet) -> StorageResult<Vec<Product>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "SELECT product_id, tags, popularity FROM products WHERE tags && $1::text[]",
                &[&tags_param(tags)],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows.iter().map(row_to_product).collect())
    }

    async fn upsert_product(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_one(
                "INSERT INTO products (product_id, tags, popularity) VALUES ($1, $2, 0) \
                 ON CONFLICT (product_id) DO UPDATE SET tags = EXCLUDED.tags \
                 RETURNING (xmax = 0) AS inserted",
                &[&id.as_i64(), &tags_param(tags)],
            )
            .await
            .map_err(pg_err)?;
        Ok(row.get("inserted"))
    }

    async fn update_product_tags(&self, id: ProductId, tags: &TagSet) -> StorageResult<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE products SET tags = $2 WHERE product_id = $1",
                &[&id.as_i64(), &tags_param(tags)],
            )
            .await
            .map_err(pg_err)?;
        Ok(updated > 0)
    }

    async fn delete_product(&self, id: ProductId) -> StorageResult<Option<BTreeSet<UserUid>>> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(txn_err)?;
        lock_edges(&tx).await?;

        let holders: BTreeSet<UserUid> = tx
            .query(
                "DELETE FROM recommendations WHERE product_id = $1 RETURNING user_uid",
                &[&id.as_i64()],
            )
            .await
            .map_err(txn_err)?
            .iter()
            .map(|row| UserUid::new(row.get::<_, String>("user_uid")))
            .collect();
        let deleted = tx
            .execute("DELETE FROM products WHERE product_id = $1", &[&id.as_i64()])
            .await
            .map_err(txn_err)?;

        tx.commit().await.map_err(txn_err)?;
        Ok((deleted > 0).then_some(holders))
    }

    async fn increment_popularity(&self, id: ProductId) -> StorageResult<bool> {
        let conn = self.get_conn().await?;
        let updated = conn
            .execute(
                "UPDATE products SET popularity = popularity + 1 WHERE product_id = $1",
                &[&id.as_i64()],
            )
            .await
            .map_err(pg_err)?;
        Ok(updated > 0)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(pg_err)?;
        Ok(())
    }
}

#[async_trait]
impl RecommendationStore for PgStore {
    async fn rebuild_user_recommendations(&self, user: &User) -> StorageResult<ReplaceOutcome> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(txn_err)?;
        lock_edges(&tx).await?;

        tx.execute(
            "INSERT INTO users (user_uid, interests) VALUES ($1, $2) \
             ON CONFLICT (user_uid) DO UPDATE SET interests = EXCLUDED.interests",
            &[&user.uid.as_str(), &tags_param(&user.interests)],
        )
        .await
        .map_err(txn_err)?;
        let removed = tx
            .execute(
                "DELETE FROM recommendations WHERE user_uid = $1",
                &[&user.uid.as_str()],
            )
            .await
            .map_err(txn_err)?;

        let products: Vec<Product> = if user.interests.is_empty() {
            Vec::new()
        } else {
            tx.query(
                "SELECT product_id, tags, popularity FROM products WHERE tags && $1::text[]",
                &[&tags_param(&user.interests)],
            )
            .await
            .map_err(txn_err)?
            .iter()
            .map(row_to_product)
            .collect()
        };
        let ids: Vec<i64> = compute_candidates(&user.interests, &TagIndex::from_products(&products))
            .iter()
            .map(ProductId::as_i64)
            .collect();
        let inserted = tx
            .execute(
                "INSERT INTO recommendations (user_uid, product_id) \
                 SELECT $1::text, unnest($2::bigint[]) \
                 ON CONFLICT DO NOTHING",
                &[&user.uid.as_str(), &ids],
            )
            .await
            .map_err(txn_err)?;

        tx.commit().await.map_err(txn_err)?;
        Ok(ReplaceOutcome { removed, inserted })
    }

    async fn rebuild_product_recommendations(
        &self,
        product: ProductId,
        page_size: usize,
    ) -> StorageResult<ProductEdges> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(txn_err)?;
        lock_edges(&tx).await?;

        let previous: BTreeSet<UserUid> = tx
            .query(
                "DELETE FROM recommendations WHERE product_id = $1 RETURNING user_uid",
                &[&product.as_i64()],
            )
            .await
            .map_err(txn_err)?
            .iter()
            .map(|row| UserUid::new(row.get::<_, String>("user_uid")))
            .collect();
        let stored = tx
            .query_opt(
                "SELECT product_id, tags, popularity FROM products WHERE product_id = $1",
                &[&product.as_i64()],
            )
            .await
            .map_err(txn_err)?
            .as_ref()
            .map(row_to_product);

        let mut current = BTreeSet::new();
        if let Some(stored) = stored.filter(|p| !p.tags.is_empty()) {
            let page_size = page_size.max(1);
            let limit = i64::try_from(page_size).unwrap_or(i64::MAX);
            let mut after: Option<String> = None;
            loop {
                let page: Vec<User> = tx
                    .query(
                        "SELECT user_uid, interests FROM users \
                         WHERE ($1::text IS NULL OR user_uid > $1) \
                         ORDER BY user_uid LIMIT $2",
                        &[&after, &limit],
                    )
                    .await
                    .map_err(txn_err)?
                    .iter()
                    .map(row_to_user)
                    .collect();
                let full = page.len() == page_size;
                after = page.last().map(|u| u.uid.as_str().to_string());

                let matched: Vec<String> = page
                    .iter()
                    .filter(|u| interests_match(&u.interests, &stored.tags))
                    .map(|u| u.uid.as_str().to_string())
                    .collect();
                if !matched.is_empty() {
                    tx.execute(
                        "INSERT INTO recommendations (user_uid, product_id) \
                         SELECT unnest($1::text[]), $2 \
                         ON CONFLICT DO NOTHING",
                        &[&matched, &product.as_i64()],
                    )
                    .await
                    .map_err(txn_err)?;
                    current.extend(matched.into_iter().map(UserUid::new));
                }
                if !full || after.is_none() {
                    break;
                }
            }
        }

        tx.commit().await.map_err(txn_err)?;
        Ok(ProductEdges { previous, current })
    }

    async fn recommendations_for_user(&self, uid: &UserUid) -> StorageResult<Vec<ProductId>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "SELECT r.product_id FROM recommendations r \
                 JOIN products p ON p.product_id = r.product_id \
                 WHERE r.user_uid = $1 \
                 ORDER BY p.popularity DESC, r.product_id ASC",
                &[&uid.as_str()],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows
            .iter()
            .map(|row| ProductId(row.get::<_, i64>("product_id")))
            .collect())
    }

    async fn users_for_product(&self, product: ProductId) -> StorageResult<BTreeSet<UserUid>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                "SELECT user_uid FROM recommendations WHERE product_id = $1",
                &[&product.as_i64()],
            )
            .await
            .map_err(pg_err)?;
        Ok(rows
            .iter()
            .map(|row| UserUid::new(row.get::<_, String>("user_uid")))
            .collect())
    }
}
