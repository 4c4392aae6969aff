//! Event wire format and decoding.
//!
//! Messages arrive as `(key, payload)` pairs. The key carries the entity id out of band
//! (a user uid, or a decimal product id), and the payload is
//! `{"action": string, "time": RFC3339, "tags": [string]}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::entities::{ProductId, TagSet, UserUid};
use crate::error::EventError;

pub const ACTION_VIEW_PRODUCTS: &str = "view_products";
pub const ACTION_PRODUCT_CREATE: &str = "product_create";
pub const ACTION_PRODUCT_UPDATE: &str = "product_update";
pub const ACTION_PRODUCT_DELETE: &str = "product_delete";
pub const ACTION_USER_UPDATE: &str = "user_update";

// ============================================================================
// TOPICS
// ============================================================================

/// Subscribed topics. Each topic gets its own sequential worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topic {
    Product,
    User,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::Product, Topic::User];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Product => "product",
            Topic::User => "user",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Topic::Product),
            "user" => Ok(Topic::User),
            other => Err(EventError::InvalidKey {
                topic: other.to_string(),
                reason: "unknown topic".to_string(),
            }),
        }
    }
}

// ============================================================================
// WIRE PAYLOAD
// ============================================================================

/// JSON body of an event message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPayload {
    pub action: String,
    pub time: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl EventPayload {
    pub fn new<I, S>(action: impl Into<String>, time: DateTime<Utc>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action: action.into(),
            time: time.to_rfc3339(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::MalformedPayload {
            reason: e.to_string(),
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::MalformedPayload {
            reason: e.to_string(),
        })
    }
}

/// Product-topic actions are matched loosely: trailing CR/LF stripped, lower-cased, trimmed.
pub fn normalize_action(action: &str) -> String {
    action
        .trim_end_matches(['\n', '\r'])
        .to_lowercase()
        .trim()
        .to_string()
}

pub fn parse_event_time(value: &str) -> Result<DateTime<Utc>, EventError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| EventError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

pub fn parse_product_key(key: &[u8]) -> Result<ProductId, EventError> {
    let invalid = |reason: String| EventError::InvalidKey {
        topic: Topic::Product.to_string(),
        reason,
    };
    let text = std::str::from_utf8(key).map_err(|e| invalid(e.to_string()))?;
    text.parse::<ProductId>()
        .map_err(|e| invalid(format!("'{}' is not a product id: {}", text, e)))
}

pub fn parse_user_key(key: &[u8]) -> Result<UserUid, EventError> {
    let invalid = |reason: String| EventError::InvalidKey {
        topic: Topic::User.to_string(),
        reason,
    };
    let text = std::str::from_utf8(key).map_err(|e| invalid(e.to_string()))?;
    if text.is_empty() {
        return Err(invalid("empty user uid".to_string()));
    }
    Ok(UserUid::new(text))
}

// ============================================================================
// DECODED EVENTS
// ============================================================================

/// What a decoded event asks the processor to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    UserUpdated { uid: UserUid, interests: TagSet },
    ProductCreated { id: ProductId, tags: TagSet },
    ProductUpdated { id: ProductId, tags: TagSet },
    ProductDeleted { id: ProductId },
    ProductViewed { id: ProductId },
    /// Action not recognized on this topic; acknowledged without effect.
    Unrecognized,
}

/// A validated event ready for the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub topic: Topic,
    /// Raw key, lossily decoded, for logging.
    pub key: String,
    /// Action after topic-specific normalization.
    pub action: String,
    pub occurred_at: DateTime<Utc>,
    pub tags: TagSet,
    pub kind: EventKind,
}

impl DomainEvent {
    /// Decode and validate one message.
    ///
    /// Payload and timestamp are checked before the action is looked at, so a
    /// malformed message is rejected even when its action would have been ignored.
    /// The key is only parsed for recognized actions.
    pub fn decode(topic: Topic, key: &[u8], payload: &[u8]) -> Result<Self, EventError> {
        let payload = EventPayload::parse(payload)?;
        let occurred_at = parse_event_time(&payload.time)?;
        let tags: TagSet = payload.tags.into_iter().collect();

        let action = match topic {
            Topic::Product => normalize_action(&payload.action),
            Topic::User => payload.action,
        };

        let kind = match (topic, action.as_str()) {
            (Topic::Product, ACTION_VIEW_PRODUCTS) => EventKind::ProductViewed {
                id: parse_product_key(key)?,
            },
            (Topic::Product, ACTION_PRODUCT_CREATE) => EventKind::ProductCreated {
                id: parse_product_key(key)?,
                tags: tags.clone(),
            },
            (Topic::Product, ACTION_PRODUCT_UPDATE) => EventKind::ProductUpdated {
                id: parse_product_key(key)?,
                tags: tags.clone(),
            },
            (Topic::Product, ACTION_PRODUCT_DELETE) => EventKind::ProductDeleted {
                id: parse_product_key(key)?,
            },
            (Topic::User, ACTION_USER_UPDATE) => EventKind::UserUpdated {
                uid: parse_user_key(key)?,
                interests: tags.clone(),
            },
            _ => EventKind::Unrecognized,
        };

        Ok(Self {
            topic,
            key: String::from_utf8_lossy(key).into_owned(),
            action,
            occurred_at,
            tags,
            kind,
        })
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self.kind, EventKind::Unrecognized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tag_set;

    const TIME: &str = "2024-05-01T10:00:00Z";

    fn payload(action: &str, tags: &[&str]) -> Vec<u8> {
        serde_json::json!({ "action": action, "time": TIME, "tags": tags })
            .to_string()
            .into_bytes()
    }

    #[test]
    fn test_decode_product_create() {
        let event =
            DomainEvent::decode(Topic::Product, b"17", &payload("product_create", &["a", "a", "b"]))
                .unwrap();
        assert_eq!(
            event.kind,
            EventKind::ProductCreated {
                id: ProductId(17),
                tags: tag_set(["a", "b"]),
            }
        );
        assert_eq!(event.occurred_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_product_action_is_normalized() {
        let event =
            DomainEvent::decode(Topic::Product, b"3", &payload("  View_Products\r\n", &[])).unwrap();
        assert_eq!(event.action, "view_products");
        assert_eq!(event.kind, EventKind::ProductViewed { id: ProductId(3) });
    }

    #[test]
    fn test_user_action_is_exact() {
        let event = DomainEvent::decode(Topic::User, b"u1", &payload("USER_UPDATE", &["x"])).unwrap();
        assert_eq!(event.kind, EventKind::Unrecognized);

        let event = DomainEvent::decode(Topic::User, b"u1", &payload("user_update", &["x"])).unwrap();
        assert_eq!(
            event.kind,
            EventKind::UserUpdated {
                uid: UserUid::new("u1"),
                interests: tag_set(["x"]),
            }
        );
    }

    #[test]
    fn test_action_on_wrong_topic_is_unrecognized() {
        let event = DomainEvent::decode(Topic::User, b"u1", &payload("product_delete", &[])).unwrap();
        assert!(!event.is_recognized());
    }

    #[test]
    fn test_unknown_action_skips_key_validation() {
        let event = DomainEvent::decode(Topic::Product, b"not-a-number", &payload("restock", &[]))
            .unwrap();
        assert_eq!(event.kind, EventKind::Unrecognized);
    }

    #[test]
    fn test_malformed_json_is_poison() {
        let err = DomainEvent::decode(Topic::Product, b"1", b"{not json").unwrap_err();
        assert!(matches!(err, EventError::MalformedPayload { .. }));
        assert!(err.is_poison());
    }

    #[test]
    fn test_bad_timestamp_is_poison() {
        let body = serde_json::json!({ "action": "product_delete", "time": "yesterday", "tags": [] })
            .to_string();
        let err = DomainEvent::decode(Topic::Product, b"1", body.as_bytes()).unwrap_err();
        assert!(matches!(err, EventError::InvalidTimestamp { .. }));
        assert!(err.is_poison());
    }

    #[test]
    fn test_bad_product_key_is_poison() {
        let err = DomainEvent::decode(Topic::Product, b"abc", &payload("product_delete", &[]))
            .unwrap_err();
        assert!(matches!(err, EventError::InvalidKey { .. }));
    }

    #[test]
    fn test_empty_user_key_rejected() {
        let err = DomainEvent::decode(Topic::User, b"", &payload("user_update", &["a"])).unwrap_err();
        assert!(err.is_poison());
    }

    #[test]
    fn test_null_and_missing_tags_decode_empty() {
        let body = format!(r#"{{"action":"product_delete","time":"{}","tags":null}}"#, TIME);
        let event = DomainEvent::decode(Topic::Product, b"1", body.as_bytes()).unwrap();
        assert!(event.tags.is_empty());

        let body = format!(r#"{{"action":"product_delete","time":"{}"}}"#, TIME);
        let event = DomainEvent::decode(Topic::Product, b"1", body.as_bytes()).unwrap();
        assert!(event.tags.is_empty());
    }

    #[test]
    fn test_payload_round_trip_preserves_wire_fields() {
        let time = parse_event_time(TIME).unwrap();
        let bytes = EventPayload::new("product_update", time, ["b", "a"]).to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["action"], "product_update");
        assert_eq!(value["tags"], serde_json::json!(["b", "a"]));
        assert!(parse_event_time(value["time"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_topic_from_str() {
        assert_eq!("product".parse::<Topic>().unwrap(), Topic::Product);
        assert_eq!("user".parse::<Topic>().unwrap(), Topic::User);
        assert!("orders".parse::<Topic>().is_err());
    }
}
