//! Produce-side pipeline: envelope, encode, publish with retry.

use crate::models::{CONTENT_TYPE_AVRO, EVENT_SOURCE, EVENT_TYPE, USER_EVENT_SCHEMA};
use event_broker::{
    retry_with_backoff, BrokerError, BrokerRecord, EnvelopeError, EventEnvelope, MessageBroker,
    PublishAck, RetryPolicy,
};
use schema_codec::{value_subject, SchemaCodec, SchemaError};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Errors from the publish pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("invalid envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("publish failed after {attempts} attempts: {source}")]
    PublishFailed {
        attempts: u32,
        #[source]
        source: BrokerError,
    },
}

/// Static configuration for one producer.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Topic every publish goes to
    pub topic: String,
    /// Event type stamped on generated envelopes
    pub event_type: String,
    /// Producer identity stamped on generated envelopes
    pub source: String,
    /// Media type stamped on generated envelopes
    pub content_type: String,
    /// Avro schema registered under the topic's value subject
    pub schema_definition: String,
    /// Backoff applied to schema registration and publishing
    pub retry: RetryPolicy,
}

impl ProducerSettings {
    /// Settings for the user events topic.
    pub fn for_user_events(topic: &str, retry: RetryPolicy) -> Self {
        Self {
            topic: topic.to_string(),
            event_type: EVENT_TYPE.to_string(),
            source: EVENT_SOURCE.to_string(),
            content_type: CONTENT_TYPE_AVRO.to_string(),
            schema_definition: USER_EVENT_SCHEMA.to_string(),
            retry,
        }
    }
}

/// Publishes schema-encoded, enveloped events to one topic.
///
/// The schema is registered once, on the first publish; the id is then
/// reused for the life of the producer. Transient failures on both the
/// registration and the publish are retried with exponential backoff.
pub struct EventProducer {
    broker: Arc<dyn MessageBroker>,
    codec: Arc<SchemaCodec>,
    settings: ProducerSettings,
    schema_id: OnceCell<u32>,
}

impl EventProducer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        codec: Arc<SchemaCodec>,
        settings: ProducerSettings,
    ) -> Self {
        Self {
            broker,
            codec,
            settings,
            schema_id: OnceCell::new(),
        }
    }

    /// Register the schema on first use and memoize the id.
    async fn ensure_schema(&self) -> Result<u32, SchemaError> {
        let id = self
            .schema_id
            .get_or_try_init(|| async {
                let subject = value_subject(&self.settings.topic);
                let id = retry_with_backoff(
                    || {
                        self.codec
                            .register(&subject, &self.settings.schema_definition)
                    },
                    &self.settings.retry,
                    "register_schema",
                )
                .await?;
                info!(subject = %subject, schema_id = id, "Schema registered");
                Ok(id)
            })
            .await?;
        Ok(*id)
    }

    /// Wrap a payload in a fresh envelope and publish it.
    pub async fn publish<P: Serialize>(&self, payload: P) -> Result<PublishAck, ProduceError> {
        let envelope = EventEnvelope::new(
            &self.settings.event_type,
            &self.settings.source,
            &self.settings.content_type,
            payload,
        );
        self.publish_envelope(envelope).await
    }

    /// Publish a pre-built envelope.
    ///
    /// The envelope is validated and the payload encoded before anything
    /// touches the broker; an invalid envelope or payload never reaches
    /// the wire. Transient publish failures are retried per the settings,
    /// and exhaustion surfaces the last broker error.
    pub async fn publish_envelope<P: Serialize>(
        &self,
        envelope: EventEnvelope<P>,
    ) -> Result<PublishAck, ProduceError> {
        envelope.validate()?;

        let schema_id = self.ensure_schema().await?;
        let value = self.codec.encode(schema_id, &envelope.data).await?;
        let headers = envelope.to_wire_headers();

        let attempts = AtomicU32::new(0);
        let ack = retry_with_backoff(
            || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                let record = BrokerRecord::new(value.clone()).with_headers(headers.clone());
                self.broker.publish(&self.settings.topic, record).await
            },
            &self.settings.retry,
            "publish",
        )
        .await
        .map_err(|source| ProduceError::PublishFailed {
            attempts: attempts.load(Ordering::SeqCst),
            source,
        })?;

        info!(
            topic = %self.settings.topic,
            partition = ack.partition,
            offset = ack.offset,
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            "Event published"
        );
        Ok(ack)
    }
}
