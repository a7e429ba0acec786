//! Confluent-framed Avro encoding with a read-through schema cache.

use crate::{SchemaError, SchemaRegistry, SchemaResult};
use apache_avro::Schema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Leading byte of every schema-framed message value.
const MAGIC_BYTE: u8 = 0x00;
/// Magic byte plus the schema id as a big-endian `u32`.
const FRAME_LEN: usize = 5;

/// Encodes and decodes message values against registered schemas.
///
/// Schemas are parsed once and cached by id for the life of the codec;
/// ids are immutable in the registry, so entries never expire. A decode
/// of an unseen id costs one registry fetch, every later decode of the
/// same id is local.
pub struct SchemaCodec {
    registry: Arc<dyn SchemaRegistry>,
    schemas: RwLock<HashMap<u32, Arc<Schema>>>,
}

impl SchemaCodec {
    pub fn new(registry: Arc<dyn SchemaRegistry>) -> Self {
        Self {
            registry,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Register a definition under a subject and warm the cache.
    ///
    /// # Returns
    ///
    /// The schema id to pass to [`SchemaCodec::encode`].
    pub async fn register(&self, subject: &str, definition: &str) -> SchemaResult<u32> {
        let id = self.registry.register(subject, definition).await?;
        let parsed =
            Schema::parse_str(definition).map_err(|e| SchemaError::SchemaInvalid(e.to_string()))?;
        self.schemas.write().await.insert(id, Arc::new(parsed));
        Ok(id)
    }

    /// Schema for an id, from the cache or the registry.
    async fn schema(&self, id: u32) -> SchemaResult<Arc<Schema>> {
        if let Some(schema) = self.schemas.read().await.get(&id) {
            return Ok(Arc::clone(schema));
        }

        // Concurrent misses may fetch twice; the entries are identical
        let definition = self.registry.fetch(id).await?;
        let parsed = Schema::parse_str(&definition)
            .map_err(|e| SchemaError::SchemaInvalid(e.to_string()))?;
        let schema = Arc::new(parsed);
        self.schemas.write().await.insert(id, Arc::clone(&schema));
        debug!(schema_id = id, "Cached schema from registry");
        Ok(schema)
    }

    /// Encode a payload under a registered schema id.
    ///
    /// The payload is validated against the schema before encoding; a
    /// payload the schema does not describe fails with
    /// [`SchemaError::Encoding`] and nothing reaches the wire.
    pub async fn encode<T: Serialize>(&self, schema_id: u32, payload: &T) -> SchemaResult<Vec<u8>> {
        let schema = self.schema(schema_id).await?;

        let value = apache_avro::to_value(payload).map_err(|e| SchemaError::Encoding {
            schema_id,
            reason: e.to_string(),
        })?;
        let resolved = value.resolve(&schema).map_err(|e| SchemaError::Encoding {
            schema_id,
            reason: e.to_string(),
        })?;
        let datum =
            apache_avro::to_avro_datum(&schema, resolved).map_err(|e| SchemaError::Encoding {
                schema_id,
                reason: e.to_string(),
            })?;

        let mut framed = Vec::with_capacity(FRAME_LEN + datum.len());
        framed.push(MAGIC_BYTE);
        framed.extend_from_slice(&schema_id.to_be_bytes());
        framed.extend_from_slice(&datum);
        Ok(framed)
    }

    /// Decode a framed message value into a payload.
    ///
    /// The schema id embedded in the frame decides which schema decodes
    /// the datum; callers never pick one themselves.
    pub async fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> SchemaResult<T> {
        let (schema_id, datum) = split_frame(bytes)?;
        let schema = self.schema(schema_id).await?;

        let mut reader = datum;
        let value = apache_avro::from_avro_datum(&schema, &mut reader, None)
            .map_err(|e| SchemaError::Decoding(e.to_string()))?;
        apache_avro::from_value(&value).map_err(|e| SchemaError::Decoding(e.to_string()))
    }

    /// Schema id embedded in a framed message value.
    pub fn schema_id(bytes: &[u8]) -> SchemaResult<u32> {
        split_frame(bytes).map(|(id, _)| id)
    }
}

fn split_frame(bytes: &[u8]) -> SchemaResult<(u32, &[u8])> {
    if bytes.len() < FRAME_LEN {
        return Err(SchemaError::Decoding(format!(
            "value too short for schema frame: {} bytes",
            bytes.len()
        )));
    }
    if bytes[0] != MAGIC_BYTE {
        return Err(SchemaError::Decoding(format!(
            "unexpected magic byte 0x{:02x}",
            bytes[0]
        )));
    }
    let id = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((id, &bytes[FRAME_LEN..]))
}
