//! # Schema Registry and Codec
//!
//! Serialization governance for messages crossing the broker boundary.
//! Producers register Avro schemas with a registry and frame every value
//! with the schema id; consumers resolve the embedded id back to a schema
//! before decoding. Neither side ever guesses at a wire layout.
//!
//! ## Wire Format
//!
//! Every encoded value carries a five byte prefix: a zero magic byte
//! followed by the schema id as a big-endian `u32`, then the Avro datum
//! in binary encoding. [`SchemaCodec`] owns framing on both sides.
//!
//! ## Implementations
//!
//! - [`HttpSchemaRegistry`]: REST client for a Confluent-compatible
//!   registry service.
//! - [`InMemoryRegistry`]: process-local registry for tests and local
//!   development. Identical definitions receive identical ids.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use schema_codec::{InMemoryRegistry, SchemaCodec};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(InMemoryRegistry::new());
//! let codec = SchemaCodec::new(registry);
//!
//! let definition = r#"{"type": "record", "name": "Ping", "fields": [
//!     {"name": "seq", "type": "long"}
//! ]}"#;
//! let schema_id = codec.register("pings-value", definition).await?;
//!
//! let framed = codec.encode(schema_id, &serde_json::json!({"seq": 1})).await?;
//! let decoded: serde_json::Value = codec.decode(&framed).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use event_broker::Retryable;
use std::fmt;

mod codec;
mod http_registry;
mod inmemory_registry;

pub use codec::SchemaCodec;
pub use http_registry::HttpSchemaRegistry;
pub use inmemory_registry::InMemoryRegistry;

/// Errors from registry calls and codec operations.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The registry could not be reached or answered with a server fault.
    #[error("schema registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// The registry rejected the definition, or the definition failed to parse.
    #[error("schema rejected: {0}")]
    SchemaInvalid(String),

    /// No schema is registered under this id.
    #[error("schema id {0} not found in registry")]
    SchemaNotFound(u32),

    /// The payload could not be serialized under the schema.
    #[error("failed to encode payload with schema {schema_id}: {reason}")]
    Encoding { schema_id: u32, reason: String },

    /// The message value was malformed or did not match its schema.
    #[error("failed to decode message value: {0}")]
    Decoding(String),
}

impl Retryable for SchemaError {
    fn is_transient(&self) -> bool {
        matches!(self, SchemaError::RegistryUnavailable(_))
    }
}

/// Result alias for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Subject under which a topic's value schemas are registered.
pub fn value_subject(topic: &str) -> String {
    format!("{}-value", topic)
}

/// Storage and lookup of Avro schema definitions.
///
/// Ids are global: two subjects registering byte-identical definitions
/// share one id, and an id fetched on the consumer side resolves without
/// knowing which subject produced it.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Register a schema definition under a subject, returning its id.
    ///
    /// Registering a definition that is already stored returns the
    /// existing id rather than allocating a new one.
    async fn register(&self, subject: &str, definition: &str) -> SchemaResult<u32>;

    /// Fetch the definition stored under an id.
    async fn fetch(&self, id: u32) -> SchemaResult<String>;
}

impl fmt::Debug for dyn SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaRegistry")
    }
}
