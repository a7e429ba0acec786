//! # Message Broker Abstraction
//!
//! A platform-level abstraction over a partitioned, offset-addressed message
//! broker with consumer-group semantics.
//!
//! ## Why This Lives in Tier 1
//!
//! The broker boundary is a **shared runtime capability** that all modules
//! depend on. Placing it in `platform/` (Tier 1) allows:
//! - Modules to depend on platform crates without circular dependencies
//! - Pipelines to be written once against the trait and reused per domain
//! - Config-driven swap between Kafka (production) and InMemory (dev/test)
//!
//! ## Delivery Model
//!
//! Delivery is at-least-once. A subscription pulls messages one at a time and
//! commits the next-read offset explicitly after the message has been fully
//! processed. Nothing in this crate commits on the caller's behalf: a message
//! whose offset is never committed is redelivered to the group's next
//! subscription.
//!
//! ## Implementations
//!
//! - **KafkaBroker**: Production implementation using rdkafka
//! - **InMemoryBroker**: Test/dev implementation using in-process logs
//!
//! ## Usage
//!
//! ```rust,no_run
//! use event_broker::{BrokerRecord, InMemoryBroker, KafkaBroker, MessageBroker, ResetPolicy};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Production: Kafka
//! let broker: Arc<dyn MessageBroker> = Arc::new(KafkaBroker::connect("localhost:9992", "app")?);
//!
//! // Dev/Test: In-Memory
//! let broker: Arc<dyn MessageBroker> = Arc::new(InMemoryBroker::new());
//!
//! // Publish a record
//! let ack = broker
//!     .publish("user-events", BrokerRecord::new(b"payload".to_vec()))
//!     .await?;
//! println!("stored at partition {} offset {}", ack.partition, ack.offset);
//!
//! // Pull messages for a consumer group, committing after each one
//! let mut subscription = broker
//!     .subscribe("user-events", "analytics-group", ResetPolicy::Earliest)
//!     .await?;
//! while let Some(message) = subscription.next_message().await? {
//!     // Process message, then advance the group's offset
//!     subscription.commit(message.partition, message.offset + 1).await?;
//! }
//! # Ok(())
//! # }
//! ```

mod envelope;
mod inmemory;
mod kafka;
pub mod retry;

pub use envelope::{
    EnvelopeError, EventEnvelope, HEADER_CONTENT_TYPE, HEADER_ID, HEADER_SOURCE,
    HEADER_SPEC_VERSION, HEADER_TIME, HEADER_TYPE, SPEC_VERSION,
};
pub use inmemory::InMemoryBroker;
pub use kafka::KafkaBroker;
pub use retry::{retry_with_backoff, Retryable, RetryPolicy};

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// An outgoing record: raw value bytes plus string-valued headers.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    /// Transport headers stored alongside the value
    pub headers: HashMap<String, String>,
    /// The record value (raw bytes)
    pub value: Vec<u8>,
}

impl BrokerRecord {
    /// Create a record with no headers
    pub fn new(value: Vec<u8>) -> Self {
        Self {
            headers: HashMap::new(),
            value,
        }
    }

    /// Attach headers to the record
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

/// A message delivered to a subscription.
///
/// `topic`, `partition` and `offset` are assigned by the broker and are
/// read-only facts about where the record is stored.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Topic the record was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Position within the partition
    pub offset: i64,
    /// Transport headers stored alongside the value
    pub headers: HashMap<String, String>,
    /// The record value (raw bytes)
    pub value: Vec<u8>,
}

/// Broker acknowledgment for a published record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Partition the record was appended to
    pub partition: i32,
    /// Offset assigned to the record
    pub offset: i64,
}

/// Where a consumer group starts reading when it has no committed offset.
///
/// A committed offset always wins; the reset policy is only consulted for
/// partitions the group has never committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Start from the beginning of the log
    #[default]
    Earliest,
    /// Start from records published after the subscription
    Latest,
}

impl ResetPolicy {
    /// Broker-config spelling of the policy
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetPolicy::Earliest => "earliest",
            ResetPolicy::Latest => "latest",
        }
    }
}

impl FromStr for ResetPolicy {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earliest" => Ok(ResetPolicy::Earliest),
            "latest" => Ok(ResetPolicy::Latest),
            other => Err(BrokerError::Configuration(format!(
                "unknown reset policy: {}",
                other
            ))),
        }
    }
}

/// Errors that can occur at the broker boundary
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("publish rejected by broker: {0}")]
    Rejected(String),

    #[error("failed to subscribe to topic: {0}")]
    Subscribe(String),

    #[error("failed to receive message: {0}")]
    Receive(String),

    #[error("offset commit failed: {0}")]
    Commit(String),

    #[error("client configuration error: {0}")]
    Configuration(String),
}

impl Retryable for BrokerError {
    fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable(_))
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Core broker abstraction for publishing records and pulling them back per
/// consumer group.
///
/// This trait defines the interface that all broker implementations must
/// satisfy. Publishing resolves only after the broker acknowledges the write
/// at its configured acknowledgment level; until then the record must be
/// treated as undelivered.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a record to a topic
    ///
    /// # Arguments
    /// * `topic` - The topic to append to (e.g., "user-events")
    /// * `record` - Headers and value bytes to store
    ///
    /// # Returns
    /// * `Ok(PublishAck)` with the broker-assigned partition and offset
    /// * `Err(BrokerError)` if the write was not acknowledged
    async fn publish(&self, topic: &str, record: BrokerRecord) -> BrokerResult<PublishAck>;

    /// Open a subscription for a consumer group
    ///
    /// # Arguments
    /// * `topic` - The topic to read
    /// * `group_id` - Consumer group whose committed offsets position the read
    /// * `reset` - Starting position for partitions with no committed offset
    ///
    /// # Returns
    /// * `Ok(Box<dyn Subscription>)` positioned at the group's offsets
    /// * `Err(BrokerError)` if the subscription could not be established
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        reset: ResetPolicy,
    ) -> BrokerResult<Box<dyn Subscription>>;
}

/// A consumer group's read handle on one topic.
///
/// Messages are pulled one at a time; the offset a message was read from is
/// only advanced for the group when [`Subscription::commit`] is called.
/// Dropping the subscription without committing leaves the group's position
/// untouched, so the same messages are delivered again to the next
/// subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Wait for the next message.
    ///
    /// This is the pipeline's sole suspension point. `Ok(None)` means the
    /// broker has gone away and no further messages will ever arrive.
    async fn next_message(&mut self) -> BrokerResult<Option<ReceivedMessage>>;

    /// Commit the group's next-read offset for one partition of the
    /// subscribed topic.
    ///
    /// After processing a message at offset `n`, commit `n + 1`.
    async fn commit(&mut self, partition: i32, offset: i64) -> BrokerResult<()>;
}

impl fmt::Debug for dyn MessageBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageBroker")
    }
}
