//! Process-local schema registry for tests and single-process runs.

use crate::{SchemaError, SchemaRegistry, SchemaResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct RegistryState {
    ids_by_definition: HashMap<String, u32>,
    definitions_by_id: HashMap<u32, String>,
    next_id: u32,
}

/// In-memory [`SchemaRegistry`] with content-addressed ids.
///
/// Definitions are keyed by their exact text: registering the same
/// definition twice, under any subject, yields the same id. Ids start
/// at 1 and never get reused.
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistry for InMemoryRegistry {
    async fn register(&self, subject: &str, definition: &str) -> SchemaResult<u32> {
        // Reject definitions a real registry would refuse to store
        apache_avro::Schema::parse_str(definition)
            .map_err(|e| SchemaError::SchemaInvalid(e.to_string()))?;

        let mut state = self.state.lock().await;
        if let Some(id) = state.ids_by_definition.get(definition) {
            return Ok(*id);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.ids_by_definition.insert(definition.to_string(), id);
        state.definitions_by_id.insert(id, definition.to_string());
        debug!(subject = %subject, schema_id = id, "Registered schema");
        Ok(id)
    }

    async fn fetch(&self, id: u32) -> SchemaResult<String> {
        let state = self.state.lock().await;
        state
            .definitions_by_id
            .get(&id)
            .cloned()
            .ok_or(SchemaError::SchemaNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PING_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Ping",
        "fields": [{"name": "seq", "type": "long"}]
    }"#;

    const PONG_SCHEMA: &str = r#"{
        "type": "record",
        "name": "Pong",
        "fields": [{"name": "seq", "type": "long"}]
    }"#;

    #[tokio::test]
    async fn test_register_then_fetch_round_trips() {
        let registry = InMemoryRegistry::new();

        let id = registry.register("pings-value", PING_SCHEMA).await.unwrap();
        let fetched = registry.fetch(id).await.unwrap();

        assert_eq!(fetched, PING_SCHEMA);
    }

    #[tokio::test]
    async fn test_register_is_idempotent_for_identical_definitions() {
        let registry = InMemoryRegistry::new();

        let first = registry.register("pings-value", PING_SCHEMA).await.unwrap();
        let second = registry.register("pings-value", PING_SCHEMA).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_identical_definition_shares_id_across_subjects() {
        let registry = InMemoryRegistry::new();

        let pings = registry.register("pings-value", PING_SCHEMA).await.unwrap();
        let echoes = registry.register("echoes-value", PING_SCHEMA).await.unwrap();

        assert_eq!(pings, echoes);
    }

    #[tokio::test]
    async fn test_distinct_definitions_get_distinct_ids() {
        let registry = InMemoryRegistry::new();

        let ping = registry.register("pings-value", PING_SCHEMA).await.unwrap();
        let pong = registry.register("pongs-value", PONG_SCHEMA).await.unwrap();

        assert_ne!(ping, pong);
    }

    #[tokio::test]
    async fn test_ids_start_at_one() {
        let registry = InMemoryRegistry::new();

        let id = registry.register("pings-value", PING_SCHEMA).await.unwrap();

        assert_eq!(id, 1);
    }

    #[tokio::test]
    async fn test_unparseable_definition_is_rejected() {
        let registry = InMemoryRegistry::new();

        let result = registry.register("bad-value", "{\"type\": \"nonsense\"}").await;

        assert!(matches!(result, Err(SchemaError::SchemaInvalid(_))));
    }

    #[tokio::test]
    async fn test_fetch_unknown_id_is_not_found() {
        let registry = InMemoryRegistry::new();

        let result = registry.fetch(99).await;

        assert!(matches!(result, Err(SchemaError::SchemaNotFound(99))));
    }
}
