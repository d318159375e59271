//! In-memory channel-based broker for local development and tests.
//!
//! Uses tokio broadcast channels for pub/sub within a single process.
//! Partitioning is simulated: every topic has a fixed partition count and
//! keys hash to partitions the way a real broker would route them. Groups
//! report their partitions assigned after a configurable latency, so the
//! startup readiness barrier can be exercised without a real cluster.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::{BrokerError, Delivery, DeliveryStream, MessageBroker, PartitionId, Result};

/// Broadcast capacity per topic.
const TOPIC_CAPACITY: usize = 1024;

/// Configuration for the channel broker.
#[derive(Clone, Debug)]
pub struct ChannelBrokerConfig {
    /// Simulated partition count per topic.
    pub partitions: usize,
    /// Delay between a group subscribing and its partitions reporting as
    /// assigned. Zero means assignment is immediate.
    pub assignment_latency: Duration,
}

impl Default for ChannelBrokerConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            assignment_latency: Duration::ZERO,
        }
    }
}

impl ChannelBrokerConfig {
    /// Config with immediate partition assignment.
    pub fn immediate(partitions: usize) -> Self {
        Self {
            partitions,
            assignment_latency: Duration::ZERO,
        }
    }

    /// Set the simulated assignment latency.
    pub fn with_assignment_latency(mut self, latency: Duration) -> Self {
        self.assignment_latency = latency;
        self
    }
}

impl From<&super::ChannelConfig> for ChannelBrokerConfig {
    fn from(config: &super::ChannelConfig) -> Self {
        Self {
            partitions: config.partitions,
            assignment_latency: Duration::from_millis(config.assignment_latency_ms),
        }
    }
}

/// Subscription state for one consumer group.
struct GroupState {
    subscribed_at: Instant,
}

/// In-memory broker backed by tokio broadcast channels.
pub struct ChannelBroker {
    config: ChannelBrokerConfig,
    topics: RwLock<HashMap<String, broadcast::Sender<Delivery>>>,
    groups: RwLock<HashMap<String, GroupState>>,
}

impl ChannelBroker {
    /// Create a new channel broker.
    pub fn new(config: ChannelBrokerConfig) -> Self {
        info!(
            partitions = config.partitions,
            assignment_latency = ?config.assignment_latency,
            "Channel broker initialized"
        );

        Self {
            config,
            topics: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the broadcast sender for a topic.
    async fn sender_for(&self, topic: &str) -> broadcast::Sender<Delivery> {
        if let Some(sender) = self.topics.read().await.get(topic) {
            return sender.clone();
        }

        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Route a key to a partition the way a keyed producer would.
    fn partition_for(&self, key: &[u8]) -> PartitionId {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.config.partitions as u64) as PartitionId
    }
}

#[async_trait]
impl MessageBroker for ChannelBroker {
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let sender = self.sender_for(topic).await;
        let delivery = Delivery {
            topic: topic.to_string(),
            partition: self.partition_for(key),
            payload: payload.to_vec(),
        };

        // No receivers is fine for publish-only scenarios
        match sender.send(delivery) {
            Ok(receivers) => {
                debug!(topic = %topic, receivers, "Published to channel topic");
            }
            Err(_) => {
                debug!(topic = %topic, "Published to channel topic (no receivers)");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topics: &[String], group: &str) -> Result<DeliveryStream> {
        if topics.is_empty() {
            return Err(BrokerError::Subscribe("no topics given".to_string()));
        }

        let (tx, rx) = mpsc::channel(TOPIC_CAPACITY);

        for topic in topics {
            let mut receiver = self.sender_for(topic).await.subscribe();
            let tx = tx.clone();
            let topic = topic.clone();

            tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(delivery) => {
                            if tx.send(delivery).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::error!(
                                topic = %topic,
                                skipped = n,
                                "Channel subscriber lagged, skipped messages"
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            });
        }

        self.groups.write().await.insert(
            group.to_string(),
            GroupState {
                subscribed_at: Instant::now(),
            },
        );

        info!(group = %group, topics = ?topics, "Group subscribed to channel broker");

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn assigned_partitions(&self, group: &str) -> Result<HashSet<PartitionId>> {
        let groups = self.groups.read().await;

        let Some(state) = groups.get(group) else {
            return Ok(HashSet::new());
        };

        if state.subscribed_at.elapsed() < self.config.assignment_latency {
            return Ok(HashSet::new());
        }

        Ok((0..self.config.partitions as PartitionId).collect())
    }
}
