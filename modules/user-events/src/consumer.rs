//! Consume-side pipeline: pull, decode, handle, commit.
//!
//! The loop commits a message's next-read offset only after the handler
//! returns success. Every failure path leaves the offset uncommitted, so
//! the message is delivered again to the group's next subscription.

use event_broker::{
    BrokerError, EventEnvelope, MessageBroker, ResetPolicy, Retryable, RetryPolicy, Subscription,
};
use schema_codec::{SchemaCodec, SchemaError};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What the loop does when an offset commit fails.
///
/// The message was already processed, so retrying delivery is not an
/// option; the only question is whether to fight for the commit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitFailurePolicy {
    /// Surface the first commit failure and stop the loop.
    #[default]
    Abort,
    /// Retry transient commit failures with backoff before surfacing.
    Retry,
}

impl FromStr for CommitFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(CommitFailurePolicy::Abort),
            "retry" => Ok(CommitFailurePolicy::Retry),
            other => Err(format!("unknown commit failure policy: {}", other)),
        }
    }
}

/// Per-group consumer configuration.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub topic: String,
    pub group_id: String,
    pub reset: ResetPolicy,
    pub commit_failure: CommitFailurePolicy,
    pub retry: RetryPolicy,
}

/// Where a message was read from, passed to handlers alongside the envelope.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Errors that stop a consumer loop.
#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("failed to decode message at {topic}[{partition}]@{offset}: {source}")]
    Decode {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: SchemaError,
    },

    #[error("handler failed for event `{event_id}`: {reason}")]
    Handler {
        event_id: String,
        reason: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("offset commit failed at {topic}[{partition}]@{offset}: {source}")]
    Commit {
        topic: String,
        partition: i32,
        offset: i64,
        #[source]
        source: BrokerError,
    },
}

/// Pulls messages for one consumer group and feeds them to a handler.
///
/// Shutdown is observed between messages only: a message that has been
/// received is processed and committed before the loop exits, so draining
/// never abandons work in flight.
pub struct EventConsumer {
    broker: Arc<dyn MessageBroker>,
    codec: Arc<SchemaCodec>,
    settings: ConsumerSettings,
    shutdown: watch::Receiver<bool>,
}

impl EventConsumer {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        codec: Arc<SchemaCodec>,
        settings: ConsumerSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            broker,
            codec,
            settings,
            shutdown,
        }
    }

    /// Run the consume loop until shutdown, subscription end, or an error.
    ///
    /// Each message is decoded, reassembled into an envelope from its wire
    /// headers, and handed to `handler` together with its delivery
    /// coordinates. The offset after the message is committed only when
    /// the handler returns `Ok`.
    ///
    /// # Errors
    ///
    /// Decode failures, handler failures, and commit failures all stop the
    /// loop with the offset uncommitted (for commit failures: possibly
    /// uncommitted), which is what makes redelivery safe to rely on.
    pub async fn run<P, H, Fut>(mut self, mut handler: H) -> Result<(), ConsumeError>
    where
        P: DeserializeOwned,
        H: FnMut(EventEnvelope<P>, Delivery) -> Fut,
        Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>,
    {
        let mut subscription = self
            .broker
            .subscribe(
                &self.settings.topic,
                &self.settings.group_id,
                self.settings.reset,
            )
            .await?;

        info!(
            topic = %self.settings.topic,
            group_id = %self.settings.group_id,
            reset = self.settings.reset.as_str(),
            "Consumer started"
        );

        loop {
            if *self.shutdown.borrow() {
                info!(group_id = %self.settings.group_id, "Shutdown observed, consumer stopped");
                return Ok(());
            }

            let received = tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        info!(group_id = %self.settings.group_id, "Shutdown channel closed, consumer stopped");
                        return Ok(());
                    }
                    // Loop back so the borrow check above decides
                    continue;
                }
                received = subscription.next_message() => received?,
            };

            let Some(message) = received else {
                info!(group_id = %self.settings.group_id, "Subscription ended");
                return Ok(());
            };

            self.process(subscription.as_mut(), &mut handler, message)
                .await?;
        }
    }

    async fn process<P, H, Fut>(
        &self,
        subscription: &mut dyn Subscription,
        handler: &mut H,
        message: event_broker::ReceivedMessage,
    ) -> Result<(), ConsumeError>
    where
        P: DeserializeOwned,
        H: FnMut(EventEnvelope<P>, Delivery) -> Fut,
        Fut: Future<Output = Result<(), Box<dyn std::error::Error + Send + Sync>>>,
    {
        let payload: P = match self.codec.decode(&message.value).await {
            Ok(payload) => payload,
            Err(source) => {
                error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    group_id = %self.settings.group_id,
                    error = %source,
                    "Failed to decode message, offset left uncommitted"
                );
                return Err(ConsumeError::Decode {
                    topic: message.topic,
                    partition: message.partition,
                    offset: message.offset,
                    source,
                });
            }
        };

        let envelope = EventEnvelope::from_wire_headers(&message.headers, payload);
        let event_id = envelope.id.clone();
        let delivery = Delivery {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        };

        if let Err(reason) = handler(envelope, delivery).await {
            error!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                group_id = %self.settings.group_id,
                event_id = %event_id,
                error = %reason,
                "Handler failed, message will be redelivered"
            );
            return Err(ConsumeError::Handler { event_id, reason });
        }

        self.commit(subscription, &message).await?;

        debug!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            group_id = %self.settings.group_id,
            event_id = %event_id,
            "Message processed and committed"
        );
        Ok(())
    }

    /// Commit the offset after `message`, honoring the commit failure policy.
    async fn commit(
        &self,
        subscription: &mut dyn Subscription,
        message: &event_broker::ReceivedMessage,
    ) -> Result<(), ConsumeError> {
        let next_offset = message.offset + 1;
        let mut attempt: u32 = 0;

        loop {
            match subscription.commit(message.partition, next_offset).await {
                Ok(()) => return Ok(()),
                Err(err)
                    if self.settings.commit_failure == CommitFailurePolicy::Retry
                        && err.is_transient()
                        && attempt < self.settings.retry.max_retries =>
                {
                    let wait = self.settings.retry.backoff(attempt);
                    warn!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = next_offset,
                        group_id = %self.settings.group_id,
                        attempt = attempt + 1,
                        backoff_ms = wait.as_millis() as u64,
                        error = %err,
                        "Commit failed, retrying with backoff"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(source) => {
                    error!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = next_offset,
                        group_id = %self.settings.group_id,
                        error = %source,
                        "Offset commit failed, stopping consumer"
                    );
                    return Err(ConsumeError::Commit {
                        topic: message.topic.clone(),
                        partition: message.partition,
                        offset: next_offset,
                        source,
                    });
                }
            }
        }
    }
}
