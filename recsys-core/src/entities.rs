//! Entity types for the catalog and the recommendation edge set

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Set of tags or interests. Ordered so iteration and serialization are deterministic,
/// and a set so duplicates collapse on construction.
pub type TagSet = BTreeSet<String>;

/// Build a [`TagSet`] from anything string-like.
pub fn tag_set<I, S>(tags: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter().map(Into::into).collect()
}

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Product identifier as issued by the products service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl ProductId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProductId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(ProductId)
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Opaque user identifier issued by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserUid(String);

impl UserUid {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for UserUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserUid {
    fn from(uid: &str) -> Self {
        Self(uid.to_string())
    }
}

impl From<String> for UserUid {
    fn from(uid: String) -> Self {
        Self(uid)
    }
}

impl AsRef<str> for UserUid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// ENTITIES
// ============================================================================

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub tags: TagSet,
    pub popularity: i64,
}

impl Product {
    /// A freshly created product starts with zero popularity.
    pub fn new(id: ProductId, tags: TagSet) -> Self {
        Self {
            id,
            tags,
            popularity: 0,
        }
    }

    pub fn with_popularity(mut self, popularity: i64) -> Self {
        self.popularity = popularity;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// A user and their declared interests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub uid: UserUid,
    pub interests: TagSet,
}

impl User {
    pub fn new(uid: impl Into<UserUid>, interests: TagSet) -> Self {
        Self {
            uid: uid.into(),
            interests,
        }
    }
}

/// A single `(user, product)` recommendation edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Recommendation {
    pub user_uid: UserUid,
    pub product_id: ProductId,
}

/// Wire shape of one entry in a user's recommendation list.
///
/// Shared by the cache value encoding and the HTTP response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendedProduct {
    pub product_id: ProductId,
}

impl From<ProductId> for RecommendedProduct {
    fn from(product_id: ProductId) -> Self {
        Self { product_id }
    }
}

/// Convert an ordered id list into its wire entries, preserving order.
pub fn to_recommended(ids: &[ProductId]) -> Vec<RecommendedProduct> {
    ids.iter().copied().map(RecommendedProduct::from).collect()
}
