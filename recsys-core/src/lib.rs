//! RECSYS Core - Entity Types, Matching Rule and Event Decoding
//!
//! Pure data structures and pure functions. Every other crate depends on this one;
//! nothing here performs I/O.

pub mod entities;
pub mod error;
pub mod event;
pub mod health;
pub mod matching;

pub use entities::{
    tag_set, to_recommended, Product, ProductId, Recommendation, RecommendedProduct, TagSet,
    User, UserUid,
};
pub use error::{
    CacheError, ConfigError, EntityKind, EventError, RecsysError, RecsysResult, StorageError,
    StorageResult,
};
pub use event::{
    normalize_action, parse_event_time, parse_product_key, parse_user_key, DomainEvent,
    EventKind, EventPayload, Topic, ACTION_PRODUCT_CREATE, ACTION_PRODUCT_DELETE,
    ACTION_PRODUCT_UPDATE, ACTION_USER_UPDATE, ACTION_VIEW_PRODUCTS,
};
pub use health::{HealthCheck, HealthStatus};
pub use matching::{compute_candidates, interests_match, ProductIndex, TagIndex};
