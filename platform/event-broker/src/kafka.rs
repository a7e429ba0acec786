//! Kafka implementation of the MessageBroker trait
//!
//! One `FutureProducer` is shared by all publishes; each subscription owns
//! its own `StreamConsumer` so offset commits go through the consumer that
//! delivered the message. Auto-commit is disabled everywhere.

use crate::{
    BrokerError, BrokerRecord, BrokerResult, MessageBroker, PublishAck, ReceivedMessage,
    ResetPolicy, Subscription,
};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// MessageBroker implementation backed by a Kafka cluster
///
/// Publishes wait for the broker acknowledgment (`acks=all`) and surface the
/// assigned partition and offset. Subscriptions are created with
/// `enable.auto.commit=false`; the group's position only moves on an
/// explicit [`Subscription::commit`].
pub struct KafkaBroker {
    brokers: String,
    client_id: String,
    producer: FutureProducer,
}

impl KafkaBroker {
    /// Create a producer connected to the cluster
    ///
    /// # Arguments
    /// * `brokers` - Comma-separated bootstrap server list (e.g., "localhost:9992")
    /// * `client_id` - Client identity reported to the cluster
    pub fn connect(brokers: &str, client_id: &str) -> BrokerResult<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("client.id", client_id)
            .set("acks", "all")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| BrokerError::Configuration(e.to_string()))?;

        info!(brokers = %brokers, client_id = %client_id, "Kafka producer created");
        Ok(Self {
            brokers: brokers.to_string(),
            client_id: client_id.to_string(),
            producer,
        })
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn publish(&self, topic: &str, record: BrokerRecord) -> BrokerResult<PublishAck> {
        let mut headers = OwnedHeaders::new();
        for (key, value) in &record.headers {
            headers = headers.insert(Header {
                key,
                value: Some(value),
            });
        }

        let future_record = FutureRecord::<(), _>::to(topic)
            .payload(&record.value)
            .headers(headers);

        match self.producer.send(future_record, DELIVERY_TIMEOUT).await {
            Ok((partition, offset)) => {
                debug!(
                    topic = %topic,
                    partition = partition,
                    offset = offset,
                    "Record acknowledged by broker"
                );
                Ok(PublishAck { partition, offset })
            }
            Err((err, _)) => Err(classify_publish_error(err)),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        reset: ResetPolicy,
    ) -> BrokerResult<Box<dyn Subscription>> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", reset.as_str())
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::Configuration(e.to_string()))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| BrokerError::Subscribe(e.to_string()))?;

        info!(topic = %topic, group_id = %group_id, reset = reset.as_str(), "Subscribed to Kafka topic");
        Ok(Box::new(KafkaSubscription {
            topic: topic.to_string(),
            consumer,
        }))
    }
}

struct KafkaSubscription {
    topic: String,
    consumer: StreamConsumer,
}

#[async_trait]
impl Subscription for KafkaSubscription {
    async fn next_message(&mut self) -> BrokerResult<Option<ReceivedMessage>> {
        match self.consumer.recv().await {
            Ok(message) => {
                let headers: HashMap<String, String> = message
                    .headers()
                    .map(|headers| {
                        headers
                            .iter()
                            .filter_map(|header| {
                                let value = header.value?;
                                Some((
                                    header.key.to_string(),
                                    String::from_utf8_lossy(value).into_owned(),
                                ))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Ok(Some(ReceivedMessage {
                    topic: message.topic().to_string(),
                    partition: message.partition(),
                    offset: message.offset(),
                    headers,
                    value: message.payload().map(|bytes| bytes.to_vec()).unwrap_or_default(),
                }))
            }
            Err(err) => Err(classify_receive_error(err)),
        }
    }

    async fn commit(&mut self, partition: i32, offset: i64) -> BrokerResult<()> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(&self.topic, partition, Offset::Offset(offset))
            .map_err(|e| BrokerError::Commit(e.to_string()))?;

        self.consumer
            .commit(&list, CommitMode::Sync)
            .map_err(classify_commit_error)?;

        debug!(
            topic = %self.topic,
            partition = partition,
            offset = offset,
            "Committed offset"
        );
        Ok(())
    }
}

/// Error codes worth another attempt once the cluster settles
fn is_transient_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::NotEnoughReplicasAfterAppend
            | RDKafkaErrorCode::RebalanceInProgress
    )
}

fn classify_publish_error(err: KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(code) if is_transient_code(code) => BrokerError::Unavailable(err.to_string()),
        _ => BrokerError::Rejected(err.to_string()),
    }
}

fn classify_receive_error(err: KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(code) if is_transient_code(code) => BrokerError::Unavailable(err.to_string()),
        _ => BrokerError::Receive(err.to_string()),
    }
}

fn classify_commit_error(err: KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(code) if is_transient_code(code) => BrokerError::Unavailable(err.to_string()),
        _ => BrokerError::Commit(err.to_string()),
    }
}
