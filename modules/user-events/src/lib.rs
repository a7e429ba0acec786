//! # User Events Pipeline
//!
//! End-to-end event pipeline for the user events topic. Producers wrap
//! payloads in versioned envelopes, encode them against a registered Avro
//! schema, and publish with retry; consumer groups decode, handle, and
//! commit offsets only after the handler succeeds, so unprocessed
//! messages are always redelivered.
//!
//! The transport is selected at startup: Kafka plus an HTTP schema
//! registry in production, or the in-process broker and registry pair for
//! local development and tests.

pub mod config;
pub mod consumer;
pub mod models;
pub mod producer;

pub use config::AppConfig;
pub use consumer::{CommitFailurePolicy, ConsumeError, ConsumerSettings, Delivery, EventConsumer};
pub use models::{
    UserEvent, ACTION_USER_CREATED, CONTENT_TYPE_AVRO, EVENT_SOURCE, EVENT_TYPE, USER_EVENT_SCHEMA,
};
pub use producer::{EventProducer, ProduceError, ProducerSettings};

use event_broker::{InMemoryBroker, KafkaBroker, MessageBroker};
use schema_codec::{HttpSchemaRegistry, InMemoryRegistry, SchemaCodec, SchemaRegistry};
use std::sync::Arc;

/// Build the broker and codec pair for the configured transport.
///
/// `BROKER_TYPE=kafka` pairs the Kafka broker with the HTTP schema
/// registry; `inmemory` pairs the process-local broker with the
/// process-local registry so the whole pipeline runs in one process.
pub fn connect(config: &AppConfig) -> Result<(Arc<dyn MessageBroker>, Arc<SchemaCodec>), String> {
    match config.broker_type.to_lowercase().as_str() {
        "inmemory" => {
            tracing::info!("Using in-memory broker and schema registry");
            let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
            let registry: Arc<dyn SchemaRegistry> = Arc::new(InMemoryRegistry::new());
            Ok((broker, Arc::new(SchemaCodec::new(registry))))
        }
        "kafka" => {
            tracing::info!(
                "Connecting to Kafka at {} with registry {}",
                config.brokers,
                config.schema_registry_url
            );
            let kafka = KafkaBroker::connect(&config.brokers, &config.client_id)
                .map_err(|e| format!("Failed to create Kafka client: {}", e))?;
            let broker: Arc<dyn MessageBroker> = Arc::new(kafka);
            let registry: Arc<dyn SchemaRegistry> =
                Arc::new(HttpSchemaRegistry::new(&config.schema_registry_url));
            Ok((broker, Arc::new(SchemaCodec::new(registry))))
        }
        other => Err(format!(
            "Invalid BROKER_TYPE: {}. Must be 'kafka' or 'inmemory'",
            other
        )),
    }
}
