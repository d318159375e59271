//! Message broker capability consumed by the dispatch subsystem.
//!
//! This module contains:
//! - `MessageBroker` trait: publish, subscribe, assigned-partition queries
//! - Broker configuration types
//! - Implementations: Kafka, in-memory channel, Mock

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::Deserialize;
use tracing::info;

// Implementation modules
#[cfg(feature = "channel")]
pub mod channel;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod mock;

// Re-exports
#[cfg(feature = "channel")]
pub use channel::{ChannelBroker, ChannelBrokerConfig};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaBroker, KafkaBrokerConfig};
pub use mock::MockBroker;

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Broker-level partition identifier within a topic.
pub type PartitionId = i32;

/// Errors that can occur during broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Assignment query failed: {0}")]
    Assignment(String),
}

impl BrokerError {
    /// Whether a retry can plausibly succeed.
    ///
    /// Connection-level failures are transient; a broker rejection is not
    /// and must surface to the caller immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Connection(_))
    }
}

/// A message delivered from a subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Topic the message arrived on.
    pub topic: String,
    /// Partition within the topic.
    pub partition: PartitionId,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
}

/// Infinite stream of deliveries for one consumer group.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// Interface to the publish/subscribe transport.
///
/// Implementations:
/// - `KafkaBroker`: Kafka via rdkafka
/// - `ChannelBroker`: in-memory, for local development and tests
/// - `MockBroker`: recording/failure-injecting test double
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a payload to a topic, keyed for partitioning.
    ///
    /// Returns once the broker acknowledges (or rejects) the message.
    async fn publish(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()>;

    /// Subscribe a consumer group to a set of topics.
    ///
    /// The returned stream is infinite and restartable only by
    /// re-subscribing.
    async fn subscribe(&self, topics: &[String], group: &str) -> Result<DeliveryStream>;

    /// Partitions currently assigned to the given consumer group on this
    /// client. Polled, not pushed; each call reflects the broker's current
    /// view with no cached state in between.
    async fn assigned_partitions(&self, group: &str) -> Result<HashSet<PartitionId>>;
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-memory channel messaging.
    #[default]
    Channel,
    /// Kafka messaging.
    Kafka,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Channel-specific configuration.
    pub channel: ChannelConfig,
    /// Kafka-specific configuration.
    pub kafka: KafkaConfig,
}

/// Channel-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Simulated partition count per topic.
    pub partitions: usize,
    /// Delay before a subscribed group reports its partitions assigned.
    pub assignment_latency_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            partitions: 4,
            assignment_latency_ms: 0,
        }
    }
}

/// Kafka-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Consumer heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Topic metadata refresh interval in milliseconds.
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

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            heartbeat_interval_ms: 1000,
            metadata_refresh_ms: 1000,
            sasl_username: None,
            sasl_password: None,
            sasl_mechanism: None,
            security_protocol: None,
            ssl_ca_location: None,
        }
    }
}

// ============================================================================
// Factory
// ============================================================================

/// Initialize a message broker based on configuration.
///
/// Returns the appropriate MessageBroker implementation based on
/// messaging_type. Requires the corresponding feature to be enabled:
/// - Channel: `--features channel` (included in default)
/// - Kafka: `--features kafka`
pub async fn init_broker(
    config: &MessagingConfig,
) -> std::result::Result<std::sync::Arc<dyn MessageBroker>, Box<dyn std::error::Error + Send + Sync>>
{
    match config.messaging_type {
        MessagingType::Channel => {
            #[cfg(feature = "channel")]
            {
                let broker = ChannelBroker::new(ChannelBrokerConfig::from(&config.channel));
                info!(messaging_type = "channel", "Message broker initialized");
                Ok(std::sync::Arc::new(broker))
            }

            #[cfg(not(feature = "channel"))]
            {
                Err("Channel support requires the 'channel' feature. Rebuild with --features channel".into())
            }
        }
        MessagingType::Kafka => {
            #[cfg(feature = "kafka")]
            {
                let mut kafka_config = KafkaBrokerConfig::new(&config.kafka.bootstrap_servers)
                    .with_heartbeat_interval_ms(config.kafka.heartbeat_interval_ms)
                    .with_metadata_refresh_ms(config.kafka.metadata_refresh_ms);
                kafka_config = apply_kafka_security(kafka_config, &config.kafka);

                let broker = KafkaBroker::new(kafka_config)?;
                info!(messaging_type = "kafka", "Message broker initialized");
                Ok(std::sync::Arc::new(broker))
            }

            #[cfg(not(feature = "kafka"))]
            {
                Err("Kafka support requires the 'kafka' feature. Rebuild with --features kafka".into())
            }
        }
    }
}

#[cfg(feature = "kafka")]
fn apply_kafka_security(mut cfg: KafkaBrokerConfig, kafka_cfg: &KafkaConfig) -> KafkaBrokerConfig {
    if let (Some(ref user), Some(ref pass), Some(ref mechanism)) = (
        &kafka_cfg.sasl_username,
        &kafka_cfg.sasl_password,
        &kafka_cfg.sasl_mechanism,
    ) {
        cfg = cfg.with_sasl(user, pass, mechanism);
    }

    if let Some(ref protocol) = kafka_cfg.security_protocol {
        cfg = cfg.with_security_protocol(protocol);
    }

    if let Some(ref ca) = kafka_cfg.ssl_ca_location {
        cfg = cfg.with_ssl_ca(ca);
    }

    cfg
}
