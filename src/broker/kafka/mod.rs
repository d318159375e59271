//! Kafka broker implementation.
//!
//! One FutureProducer shared across all publishes; one StreamConsumer per
//! consumer group, created at subscribe time. Assigned-partition queries go
//! through the group's consumer, so readiness polling reflects the live
//! rebalance state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use super::{BrokerError, Delivery, DeliveryStream, MessageBroker, PartitionId, Result};

/// Configuration for Kafka connections.
#[derive(Clone, Debug)]
pub struct KafkaBrokerConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Topic metadata refresh interval in milliseconds. Keeping this short
    /// makes partition-count changes visible to readiness polling quickly.
    pub metadata_refresh_ms: u64,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl KafkaBrokerConfig {
    /// Create a config for the given bootstrap servers.
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            heartbeat_interval_ms: 1000,
            metadata_refresh_ms: 1000,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }

    /// Set the consumer heartbeat interval.
    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    /// Set the topic metadata refresh interval.
    pub fn with_metadata_refresh_ms(mut self, interval_ms: u64) -> Self {
        self.metadata_refresh_ms = interval_ms;
        self
    }

    /// Add SASL authentication.
    pub fn with_sasl(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        mechanism: impl Into<String>,
    ) -> Self {
        self.sasl_username = Some(username.into());
        self.sasl_password = Some(password.into());
        self.sasl_mechanism = Some(mechanism.into());
        self.security_protocol = Some("SASL_SSL".to_string());
        self
    }

    /// Set security protocol.
    pub fn with_security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SSL CA certificate location.
    pub fn with_ssl_ca(mut self, ca_location: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(ca_location.into());
        self
    }

    /// Build a ClientConfig for the producer.
    fn build_producer_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("message.timeout.ms", "5000");
        config.set("acks", "all");
        config.set("enable.idempotence", "true");

        self.apply_security_config(&mut config);
        config
    }

    /// Build a ClientConfig for one consumer group.
    fn build_consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.bootstrap_servers);
        config.set("group.id", group);
        config.set("enable.auto.commit", "true");
        // Result topics are consumed by per-instance groups; history belongs
        // to instances that no longer exist.
        config.set("auto.offset.reset", "latest");
        config.set(
            "heartbeat.interval.ms",
            self.heartbeat_interval_ms.to_string(),
        );
        config.set(
            "topic.metadata.refresh.interval.ms",
            self.metadata_refresh_ms.to_string(),
        );

        self.apply_security_config(&mut config);
        config
    }

    /// Apply security settings to a ClientConfig.
    fn apply_security_config(&self, config: &mut ClientConfig) {
        if let Some(ref protocol) = self.security_protocol {
            config.set("security.protocol", protocol);
        }

        if let Some(ref mechanism) = self.sasl_mechanism {
            config.set("sasl.mechanism", mechanism);
        }

        if let Some(ref username) = self.sasl_username {
            config.set("sasl.username", username);
        }

        if let Some(ref password) = self.sasl_password {
            config.set("sasl.password", password);
        }

        if let Some(ref ca_location) = self.ssl_ca_location {
            config.set("ssl.ca.location", ca_location);
        }
    }
}

/// Kafka broker implementation.
pub struct KafkaBroker {
    producer: FutureProducer,
    config: KafkaBrokerConfig,
    consumers: RwLock<HashMap<String, Arc<StreamConsumer>>>,
}

impl KafkaBroker {
    /// Create a new Kafka broker.
    pub fn new(config: KafkaBrokerConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .build_producer_config()
            .create()
            .map_err(|e| BrokerError::Connection(format!("Failed to create Kafka producer: {}", e)))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            "Connected to Kafka"
        );

        Ok(Self {
            producer,
            config,
            consumers: RwLock::new(HashMap::new()),
        })
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| BrokerError::Publish(format!("Failed to publish: {}", e)))?;

        debug!(topic = %topic, "Published to Kafka");

        Ok(())
    }

    async fn subscribe(&self, topics: &[String], group: &str) -> Result<DeliveryStream> {
        let consumer: StreamConsumer = self
            .config
            .build_consumer_config(group)
            .create()
            .map_err(|e| BrokerError::Connection(format!("Failed to create Kafka consumer: {}", e)))?;

        let topic_refs: Vec<&str> = topics.iter().map(|s| s.as_str()).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| BrokerError::Subscribe(format!("Failed to subscribe to topics: {}", e)))?;

        info!(group = %group, topics = ?topics, "Subscribed to Kafka topics");

        let consumer = Arc::new(consumer);
        self.consumers
            .write()
            .await
            .insert(group.to_string(), Arc::clone(&consumer));

        let (tx, rx) = mpsc::channel(1024);
        let group = group.to_string();

        // Pump task: forward deliveries until the receiving side drops
        tokio::spawn(async move {
            use futures::StreamExt;
            use rdkafka::message::Message as KafkaMessage;

            let mut stream = consumer.stream();

            while let Some(result) = stream.next().await {
                match result {
                    Ok(message) => {
                        let payload = match message.payload() {
                            Some(p) => p.to_vec(),
                            None => {
                                warn!(topic = %message.topic(), "Received message with no payload");
                                continue;
                            }
                        };

                        let delivery = Delivery {
                            topic: message.topic().to_string(),
                            partition: message.partition(),
                            payload,
                        };

                        if tx.send(delivery).await.is_err() {
                            debug!(group = %group, "Delivery stream dropped, stopping consumer");
                            break;
                        }
                    }
                    Err(e) => {
                        error!(group = %group, error = %e, "Kafka consumer error");
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn assigned_partitions(&self, group: &str) -> Result<HashSet<PartitionId>> {
        let consumers = self.consumers.read().await;

        let Some(consumer) = consumers.get(group) else {
            // Not subscribed yet; nothing can be assigned
            return Ok(HashSet::new());
        };

        let assignment = consumer
            .assignment()
            .map_err(|e| BrokerError::Assignment(format!("Failed to query assignment: {}", e)))?;

        Ok(assignment.elements().iter().map(|e| e.partition()).collect())
    }
}
