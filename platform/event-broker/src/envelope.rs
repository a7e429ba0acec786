//! # Event Envelope
//!
//! Platform-wide event envelope carried in message headers alongside the
//! encoded payload.
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: One envelope struct for the entire platform
//! 2. **Strict on build, lenient on parse**: producers must supply every
//!    attribute; consumers reconstruct whatever the headers actually contain
//! 3. **Headers, not body**: metadata travels as transport headers so the
//!    record value stays a pure schema-encoded payload
//!
//! ## Envelope Attributes
//!
//! - `specversion`: Envelope contract version, fixed at "1.0"
//! - `type`: Event type in reverse-DNS form
//! - `source`: Logical producer identity
//! - `id`: Unique event identifier (UUID)
//! - `time`: RFC 3339 production timestamp
//! - `datacontenttype`: Media type of the encoded payload
//!
//! ## Wire Projection
//!
//! Every attribute except `data` maps to one transport header:
//! `ce_specversion`, `ce_type`, `ce_source`, `ce_id`, `ce_time` and
//! `content-type`. Headers a message never carried parse back as empty
//! strings, never as an error, so malformed historical messages stay
//! observable to consumers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Envelope contract version stamped on every new envelope
pub const SPEC_VERSION: &str = "1.0";

/// Header carrying the envelope contract version
pub const HEADER_SPEC_VERSION: &str = "ce_specversion";
/// Header carrying the event type
pub const HEADER_TYPE: &str = "ce_type";
/// Header carrying the producer identity
pub const HEADER_SOURCE: &str = "ce_source";
/// Header carrying the event identifier
pub const HEADER_ID: &str = "ce_id";
/// Header carrying the production timestamp
pub const HEADER_TIME: &str = "ce_time";
/// Header carrying the payload media type
pub const HEADER_CONTENT_TYPE: &str = "content-type";

/// Error returned when a to-be-published envelope fails validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope attribute `{0}` must be non-empty")]
    MissingAttribute(&'static str),
}

/// Standard event envelope wrapping a domain payload
///
/// The envelope is what gives an opaque record value an identity: what kind
/// of event it is, who produced it, when, and how the bytes are encoded.
///
/// # Type Parameter
///
/// * `T` - The event-specific payload type
///
/// # Examples
///
/// ```rust
/// use event_broker::EventEnvelope;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct UserEvent {
///     user_id: String,
///     action: String,
///     timestamp: i64,
/// }
///
/// let envelope = EventEnvelope::new(
///     "com.example.user.event",
///     "user-service",
///     "application/avro",
///     UserEvent {
///         user_id: "u1".to_string(),
///         action: "USER_CREATED".to_string(),
///         timestamp: 1_700_000_000_000,
///     },
/// );
/// assert!(envelope.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    /// Envelope contract version
    pub specversion: String,

    /// Event type in reverse-DNS form (e.g., "com.example.user.event")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Logical producer identity (e.g., "user-service")
    pub source: String,

    /// Unique event identifier
    pub id: String,

    /// RFC 3339 timestamp of production
    pub time: String,

    /// Media type of the encoded payload (e.g., "application/avro")
    pub datacontenttype: String,

    /// Event-specific payload
    pub data: T,
}

impl<T> EventEnvelope<T> {
    /// Create a new envelope with a fresh `id` and the current time
    ///
    /// # Arguments
    ///
    /// * `event_type` - Event type in reverse-DNS form
    /// * `source` - Logical producer identity
    /// * `datacontenttype` - Media type the payload will be encoded as
    /// * `data` - The domain payload
    pub fn new(event_type: &str, source: &str, datacontenttype: &str, data: T) -> Self {
        Self {
            specversion: SPEC_VERSION.to_string(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            id: Uuid::new_v4().to_string(),
            time: chrono::Utc::now().to_rfc3339(),
            datacontenttype: datacontenttype.to_string(),
            data,
        }
    }

    /// Override the generated event id (useful for testing and replays)
    pub fn with_id(mut self, id: String) -> Self {
        self.id = id;
        self
    }

    /// Override the generated timestamp
    pub fn with_time(mut self, time: String) -> Self {
        self.time = time;
        self
    }

    /// Validate the envelope before publishing
    ///
    /// # Validation Rules
    ///
    /// Every attribute must be non-empty. Publishing an envelope that fails
    /// validation is a producer bug; nothing may reach the broker without a
    /// complete envelope.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.specversion.is_empty() {
            return Err(EnvelopeError::MissingAttribute("specversion"));
        }
        if self.event_type.is_empty() {
            return Err(EnvelopeError::MissingAttribute("type"));
        }
        if self.source.is_empty() {
            return Err(EnvelopeError::MissingAttribute("source"));
        }
        if self.id.is_empty() {
            return Err(EnvelopeError::MissingAttribute("id"));
        }
        if self.time.is_empty() {
            return Err(EnvelopeError::MissingAttribute("time"));
        }
        if self.datacontenttype.is_empty() {
            return Err(EnvelopeError::MissingAttribute("datacontenttype"));
        }
        Ok(())
    }

    /// Project every attribute except `data` into transport headers
    pub fn to_wire_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert(HEADER_SPEC_VERSION.to_string(), self.specversion.clone());
        headers.insert(HEADER_TYPE.to_string(), self.event_type.clone());
        headers.insert(HEADER_SOURCE.to_string(), self.source.clone());
        headers.insert(HEADER_ID.to_string(), self.id.clone());
        headers.insert(HEADER_TIME.to_string(), self.time.clone());
        headers.insert(HEADER_CONTENT_TYPE.to_string(), self.datacontenttype.clone());
        headers
    }

    /// Reconstruct an envelope from transport headers and a decoded payload
    ///
    /// Lenient by construction: a header that is absent yields an empty
    /// attribute. Unknown headers are ignored. Parsing never fails.
    pub fn from_wire_headers(headers: &HashMap<String, String>, data: T) -> Self {
        let attribute = |name: &str| headers.get(name).cloned().unwrap_or_default();
        Self {
            specversion: attribute(HEADER_SPEC_VERSION),
            event_type: attribute(HEADER_TYPE),
            source: attribute(HEADER_SOURCE),
            id: attribute(HEADER_ID),
            time: attribute(HEADER_TIME),
            datacontenttype: attribute(HEADER_CONTENT_TYPE),
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EventEnvelope<serde_json::Value> {
        EventEnvelope::new(
            "com.example.user.event",
            "user-service",
            "application/avro",
            json!({"userId": "u1"}),
        )
    }

    #[test]
    fn test_envelope_creation() {
        let envelope = sample();

        assert_eq!(envelope.specversion, SPEC_VERSION);
        assert_eq!(envelope.event_type, "com.example.user.event");
        assert_eq!(envelope.source, "user-service");
        assert!(Uuid::parse_str(&envelope.id).is_ok());
        assert!(chrono::DateTime::parse_from_rfc3339(&envelope.time).is_ok());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn test_envelope_ids_are_unique() {
        assert_ne!(sample().id, sample().id);
    }

    #[test]
    fn test_envelope_with_builder() {
        let envelope = sample()
            .with_id("evt-1".to_string())
            .with_time("2024-01-01T00:00:00Z".to_string());

        assert_eq!(envelope.id, "evt-1");
        assert_eq!(envelope.time, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_validate_rejects_empty_attributes() {
        let envelope = sample().with_id(String::new());
        assert_eq!(
            envelope.validate(),
            Err(EnvelopeError::MissingAttribute("id"))
        );

        let mut envelope = sample();
        envelope.event_type = String::new();
        assert_eq!(
            envelope.validate(),
            Err(EnvelopeError::MissingAttribute("type"))
        );

        let mut envelope = sample();
        envelope.datacontenttype = String::new();
        assert_eq!(
            envelope.validate(),
            Err(EnvelopeError::MissingAttribute("datacontenttype"))
        );
    }

    #[test]
    fn test_wire_headers_use_canonical_names() {
        let headers = sample().to_wire_headers();

        assert_eq!(headers.len(), 6);
        assert_eq!(headers.get("ce_specversion").map(String::as_str), Some("1.0"));
        assert_eq!(
            headers.get("ce_type").map(String::as_str),
            Some("com.example.user.event")
        );
        assert_eq!(headers.get("ce_source").map(String::as_str), Some("user-service"));
        assert!(headers.contains_key("ce_id"));
        assert!(headers.contains_key("ce_time"));
        assert_eq!(
            headers.get("content-type").map(String::as_str),
            Some("application/avro")
        );
    }

    #[test]
    fn test_wire_round_trip_preserves_envelope() {
        let envelope = sample();
        let headers = envelope.to_wire_headers();

        let parsed = EventEnvelope::from_wire_headers(&headers, envelope.data.clone());
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn test_parse_missing_headers_yields_empty_attributes() {
        let parsed = EventEnvelope::from_wire_headers(&HashMap::new(), json!(null));

        assert_eq!(parsed.specversion, "");
        assert_eq!(parsed.event_type, "");
        assert_eq!(parsed.source, "");
        assert_eq!(parsed.id, "");
        assert_eq!(parsed.time, "");
        assert_eq!(parsed.datacontenttype, "");
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_parse_ignores_unknown_headers() {
        let mut headers = sample().to_wire_headers();
        headers.insert("ce_custom".to_string(), "whatever".to_string());
        headers.insert("x-request-id".to_string(), "abc".to_string());

        let parsed = EventEnvelope::from_wire_headers(&headers, json!(null));
        assert_eq!(parsed.event_type, "com.example.user.event");
        assert!(parsed.validate().is_ok());
    }
}
