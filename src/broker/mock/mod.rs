//! Mock broker implementation for testing.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;

use super::{BrokerError, Delivery, DeliveryStream, MessageBroker, PartitionId, Result};

/// A record of one publish call.
#[derive(Debug, Clone)]
pub struct PublishedRecord {
    pub topic: String,
    pub key: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Mock broker for testing.
///
/// Records publishes, supports failure injection, settable per-group
/// partition assignments, and manual delivery injection.
#[derive(Default)]
pub struct MockBroker {
    published: RwLock<Vec<PublishedRecord>>,
    fail_on_publish: RwLock<bool>,
    assignments: RwLock<HashMap<String, HashSet<PartitionId>>>,
    subscribers: RwLock<HashMap<String, Vec<mpsc::Sender<Delivery>>>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_publish(&self, fail: bool) {
        *self.fail_on_publish.write().await = fail;
    }

    /// Set the partitions reported as assigned for a group.
    pub async fn set_assigned(&self, group: &str, partitions: impl IntoIterator<Item = PartitionId>) {
        self.assignments
            .write()
            .await
            .insert(group.to_string(), partitions.into_iter().collect());
    }

    /// Deliver a payload to every subscriber of a topic.
    pub async fn inject(&self, topic: &str, partition: PartitionId, payload: &[u8]) {
        let subscribers = self.subscribers.read().await;
        if let Some(senders) = subscribers.get(topic) {
            for sender in senders {
                let _ = sender
                    .send(Delivery {
                        topic: topic.to_string(),
                        partition,
                        payload: payload.to_vec(),
                    })
                    .await;
            }
        }
    }

    pub async fn published_count(&self) -> usize {
        self.published.read().await.len()
    }

    pub async fn take_published(&self) -> Vec<PublishedRecord> {
        std::mem::take(&mut *self.published.write().await)
    }
}

#[async_trait]
impl MessageBroker for MockBroker {
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        if *self.fail_on_publish.read().await {
            return Err(BrokerError::Publish("mock publish failure".to_string()));
        }
        self.published.write().await.push(PublishedRecord {
            topic: topic.to_string(),
            key: key.to_vec(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    async fn subscribe(&self, topics: &[String], _group: &str) -> Result<DeliveryStream> {
        let (tx, rx) = mpsc::channel(64);

        let mut subscribers = self.subscribers.write().await;
        for topic in topics {
            subscribers
                .entry(topic.clone())
                .or_default()
                .push(tx.clone());
        }

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn assigned_partitions(&self, group: &str) -> Result<HashSet<PartitionId>> {
        Ok(self
            .assignments
            .read()
            .await
            .get(group)
            .cloned()
            .unwrap_or_default())
    }
}
