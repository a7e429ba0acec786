//! In-memory implementation of the MessageBroker trait for testing and development

use crate::{
    BrokerError, BrokerRecord, BrokerResult, MessageBroker, PublishAck, ReceivedMessage,
    ResetPolicy, Subscription,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

#[derive(Debug, Clone)]
struct StoredRecord {
    headers: HashMap<String, String>,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// topic -> partition index -> append-only log
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic) -> partition -> committed next-read offset
    committed: HashMap<(String, String), HashMap<i32, i64>>,
    /// topic -> round-robin cursor for publishes
    next_partition: HashMap<String, usize>,
}

/// MessageBroker implementation backed by in-process partitioned logs
///
/// This implementation is suitable for:
/// - Unit tests (no external dependencies)
/// - Local development without Docker
/// - Integration tests that need real offset semantics without a cluster
///
/// Records are appended to per-partition logs and retained for the life of
/// the broker, so a group that never commits re-reads the same records on
/// its next subscription. Publishes rotate round-robin across partitions.
///
/// # Example
/// ```rust
/// use event_broker::{BrokerRecord, InMemoryBroker, MessageBroker, ResetPolicy};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new();
///
/// let ack = broker
///     .publish("test-topic", BrokerRecord::new(b"hello".to_vec()))
///     .await?;
/// assert_eq!(ack.offset, 0);
///
/// let mut subscription = broker
///     .subscribe("test-topic", "test-group", ResetPolicy::Earliest)
///     .await?;
/// let message = subscription.next_message().await?.unwrap();
/// assert_eq!(message.value, b"hello");
///
/// subscription.commit(message.partition, message.offset + 1).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    partitions: usize,
    state: Arc<Mutex<BrokerState>>,
    // Bumped on every append so blocked subscriptions re-scan the logs
    appended: watch::Sender<u64>,
}

impl InMemoryBroker {
    /// Create a broker whose topics have a single partition
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Create a broker whose topics have a fixed number of partitions
    ///
    /// # Arguments
    /// * `partitions` - Partition count applied to every topic (minimum 1)
    pub fn with_partitions(partitions: usize) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(BrokerState::default())),
            appended,
        }
    }

    /// The committed next-read offset for a group, if the group ever
    /// committed one for this partition
    pub async fn committed(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        let state = self.state.lock().await;
        state
            .committed
            .get(&(group_id.to_string(), topic.to_string()))
            .and_then(|offsets| offsets.get(&partition))
            .copied()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, record: BrokerRecord) -> BrokerResult<PublishAck> {
        let ack = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let cursor = state.next_partition.entry(topic.to_string()).or_insert(0);
            let partition = *cursor % self.partitions;
            *cursor = (*cursor + 1) % self.partitions;

            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
            let partition_log = &mut log[partition];
            let offset = partition_log.len() as i64;
            partition_log.push(StoredRecord {
                headers: record.headers,
                value: record.value,
            });

            PublishAck {
                partition: partition as i32,
                offset,
            }
        };

        self.appended.send_modify(|version| *version += 1);
        Ok(ack)
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        reset: ResetPolicy,
    ) -> BrokerResult<Box<dyn Subscription>> {
        let mut positions = HashMap::new();
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions]);
            let committed = state
                .committed
                .get(&(group_id.to_string(), topic.to_string()));

            for (index, partition_log) in log.iter().enumerate() {
                let partition = index as i32;
                let start = committed
                    .and_then(|offsets| offsets.get(&partition))
                    .copied()
                    .unwrap_or(match reset {
                        ResetPolicy::Earliest => 0,
                        ResetPolicy::Latest => partition_log.len() as i64,
                    });
                positions.insert(partition, start);
            }
        }

        Ok(Box::new(InMemorySubscription {
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            state: Arc::clone(&self.state),
            updates: self.appended.subscribe(),
            positions,
            scan_from: 0,
        }))
    }
}

struct InMemorySubscription {
    topic: String,
    group_id: String,
    state: Arc<Mutex<BrokerState>>,
    updates: watch::Receiver<u64>,
    /// Uncommitted read positions, one per partition
    positions: HashMap<i32, i64>,
    /// Rotates so no partition is starved
    scan_from: usize,
}

impl InMemorySubscription {
    async fn try_fetch(&mut self) -> Option<ReceivedMessage> {
        let guard = self.state.lock().await;
        let log = guard.topics.get(&self.topic)?;
        let partitions = log.len();

        for step in 0..partitions {
            let index = (self.scan_from + step) % partitions;
            let partition = index as i32;
            let position = self.positions.entry(partition).or_insert(0);
            let partition_log = &log[index];

            if (*position as usize) < partition_log.len() {
                let record = &partition_log[*position as usize];
                let message = ReceivedMessage {
                    topic: self.topic.clone(),
                    partition,
                    offset: *position,
                    headers: record.headers.clone(),
                    value: record.value.clone(),
                };
                *position += 1;
                self.scan_from = (index + 1) % partitions;
                return Some(message);
            }
        }

        None
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_message(&mut self) -> BrokerResult<Option<ReceivedMessage>> {
        loop {
            if let Some(message) = self.try_fetch().await {
                return Ok(Some(message));
            }
            // Wait for the next append. A closed channel means the broker
            // itself is gone.
            if self.updates.changed().await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self, partition: i32, offset: i64) -> BrokerResult<()> {
        let mut state = self.state.lock().await;

        let known = state
            .topics
            .get(&self.topic)
            .is_some_and(|log| (partition as usize) < log.len());
        if partition < 0 || !known {
            return Err(BrokerError::Commit(format!(
                "unknown partition {} for topic {}",
                partition, self.topic
            )));
        }

        state
            .committed
            .entry((self.group_id.clone(), self.topic.clone()))
            .or_default()
            .insert(partition, offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn record(value: &[u8]) -> BrokerRecord {
        BrokerRecord::new(value.to_vec())
    }

    #[tokio::test]
    async fn test_publish_assigns_sequential_offsets() {
        let broker = InMemoryBroker::new();

        for expected in 0..3 {
            let ack = broker.publish("orders", record(b"x")).await.unwrap();
            assert_eq!(ack.partition, 0);
            assert_eq!(ack.offset, expected);
        }
    }

    #[tokio::test]
    async fn test_publish_rotates_across_partitions() {
        let broker = InMemoryBroker::with_partitions(2);

        let first = broker.publish("orders", record(b"a")).await.unwrap();
        let second = broker.publish("orders", record(b"b")).await.unwrap();
        let third = broker.publish("orders", record(b"c")).await.unwrap();

        assert_eq!((first.partition, first.offset), (0, 0));
        assert_eq!((second.partition, second.offset), (1, 0));
        assert_eq!((third.partition, third.offset), (0, 1));
    }

    #[tokio::test]
    async fn test_subscribe_receives_published_record_with_headers() {
        let broker = InMemoryBroker::new();

        let mut headers = HashMap::new();
        headers.insert("ce_type".to_string(), "com.example.user.event".to_string());
        broker
            .publish("orders", record(b"payload").with_headers(headers.clone()))
            .await
            .unwrap();

        let mut subscription = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();
        let message = timeout(Duration::from_secs(1), subscription.next_message())
            .await
            .expect("timeout")
            .unwrap()
            .expect("message");

        assert_eq!(message.topic, "orders");
        assert_eq!(message.offset, 0);
        assert_eq!(message.headers, headers);
        assert_eq!(message.value, b"payload");
    }

    #[tokio::test]
    async fn test_blocked_subscription_wakes_on_publish() {
        let broker = InMemoryBroker::new();
        let mut subscription = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();

        let reader = tokio::spawn(async move { subscription.next_message().await });

        // Give the reader a chance to block before anything is published
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish("orders", record(b"late")).await.unwrap();

        let message = timeout(Duration::from_secs(1), reader)
            .await
            .expect("timeout")
            .expect("join")
            .unwrap()
            .expect("message");
        assert_eq!(message.value, b"late");
    }

    #[tokio::test]
    async fn test_latest_reset_skips_existing_records() {
        let broker = InMemoryBroker::new();
        broker.publish("orders", record(b"old")).await.unwrap();

        let mut subscription = broker
            .subscribe("orders", "g1", ResetPolicy::Latest)
            .await
            .unwrap();
        broker.publish("orders", record(b"new")).await.unwrap();

        let message = timeout(Duration::from_secs(1), subscription.next_message())
            .await
            .expect("timeout")
            .unwrap()
            .expect("message");
        assert_eq!(message.value, b"new");
        assert_eq!(message.offset, 1);
    }

    #[tokio::test]
    async fn test_uncommitted_read_is_redelivered_to_next_subscription() {
        let broker = InMemoryBroker::new();
        broker.publish("orders", record(b"once")).await.unwrap();

        let mut first = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();
        let message = first.next_message().await.unwrap().expect("message");
        assert_eq!(message.offset, 0);
        // No commit: the group's position must not move
        drop(first);

        let mut second = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();
        let redelivered = second.next_message().await.unwrap().expect("message");
        assert_eq!(redelivered.offset, 0);
        assert_eq!(redelivered.value, b"once");
    }

    #[tokio::test]
    async fn test_committed_offset_positions_next_subscription() {
        let broker = InMemoryBroker::new();
        broker.publish("orders", record(b"first")).await.unwrap();
        broker.publish("orders", record(b"second")).await.unwrap();

        let mut first = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();
        let message = first.next_message().await.unwrap().expect("message");
        first.commit(message.partition, message.offset + 1).await.unwrap();
        drop(first);

        assert_eq!(broker.committed("g1", "orders", 0).await, Some(1));

        let mut second = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();
        let next = second.next_message().await.unwrap().expect("message");
        assert_eq!(next.offset, 1);
        assert_eq!(next.value, b"second");
    }

    #[tokio::test]
    async fn test_consumer_groups_track_independent_offsets() {
        let broker = InMemoryBroker::new();
        broker.publish("orders", record(b"m0")).await.unwrap();
        broker.publish("orders", record(b"m1")).await.unwrap();

        let mut analytics = broker
            .subscribe("orders", "analytics-group", ResetPolicy::Earliest)
            .await
            .unwrap();
        let m0 = analytics.next_message().await.unwrap().expect("message");
        analytics.commit(m0.partition, m0.offset + 1).await.unwrap();
        let m1 = analytics.next_message().await.unwrap().expect("message");
        analytics.commit(m1.partition, m1.offset + 1).await.unwrap();
        drop(analytics);

        // The second group starts from the beginning regardless
        let mut notifications = broker
            .subscribe("orders", "notifications-group", ResetPolicy::Earliest)
            .await
            .unwrap();
        let first = notifications.next_message().await.unwrap().expect("message");
        assert_eq!(first.offset, 0);

        assert_eq!(broker.committed("analytics-group", "orders", 0).await, Some(2));
        assert_eq!(broker.committed("notifications-group", "orders", 0).await, None);
    }

    #[tokio::test]
    async fn test_concurrent_publishes_get_distinct_offsets() {
        let broker = InMemoryBroker::new();

        let mut handles = Vec::new();
        for n in 0..8u8 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                broker.publish("orders", record(&[n])).await
            }));
        }

        let mut offsets = Vec::new();
        for handle in handles {
            let ack = handle.await.expect("join").unwrap();
            assert_eq!(ack.partition, 0);
            offsets.push(ack.offset);
        }

        offsets.sort_unstable();
        assert_eq!(offsets, (0..8).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_commit_unknown_partition_is_rejected() {
        let broker = InMemoryBroker::new();
        let mut subscription = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();

        let result = subscription.commit(7, 1).await;
        assert!(matches!(result, Err(BrokerError::Commit(_))));

        let result = subscription.commit(-1, 1).await;
        assert!(matches!(result, Err(BrokerError::Commit(_))));
    }

    #[tokio::test]
    async fn test_next_message_ends_when_broker_dropped() {
        let broker = InMemoryBroker::new();
        broker.publish("orders", record(b"only")).await.unwrap();

        let mut subscription = broker
            .subscribe("orders", "g1", ResetPolicy::Earliest)
            .await
            .unwrap();
        drop(broker);

        // Retained records drain first, then the subscription reports the end
        let message = subscription.next_message().await.unwrap();
        assert!(message.is_some());
        let end = timeout(Duration::from_secs(1), subscription.next_message())
            .await
            .expect("timeout")
            .unwrap();
        assert!(end.is_none());
    }
}
