//! Payload contract for the user events topic.

use serde::{Deserialize, Serialize};

/// Event type stamped on every user event envelope.
pub const EVENT_TYPE: &str = "com.example.user.event";

/// Producer identity stamped on every user event envelope.
pub const EVENT_SOURCE: &str = "user-service";

/// Media type of the encoded payload.
pub const CONTENT_TYPE_AVRO: &str = "application/avro";

/// Action recorded when a user account is created.
pub const ACTION_USER_CREATED: &str = "USER_CREATED";

/// Avro schema for [`UserEvent`], registered under the topic's value subject.
///
/// Field names are camelCase on the wire; the serde rename on the struct
/// keeps the two in lockstep.
pub const USER_EVENT_SCHEMA: &str = r#"{
    "type": "record",
    "name": "UserEvent",
    "namespace": "com.example.events",
    "fields": [
        {"name": "userId", "type": "string"},
        {"name": "action", "type": "string"},
        {"name": "timestamp", "type": "long"}
    ]
}"#;

/// A user activity fact as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    pub user_id: String,
    pub action: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl UserEvent {
    /// Create an event stamped with the current time.
    pub fn new(user_id: &str, action: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            action: action.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
