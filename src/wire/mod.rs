//! Wire shapes for commands and results.
//!
//! Both result topics carry the same `ResultMessage` shape; the
//! failed/handled topic split is producer-side routing. Payload bytes are
//! opaque to this crate and travel base64-encoded inside JSON.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;

/// Errors that can occur encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Encode failed: {0}")]
    Encode(serde_json::Error),

    #[error("Decode failed: {0}")]
    Decode(serde_json::Error),
}

/// Outbound command as published to a command topic.
///
/// Immutable once built. `target_topic` is routing information and does not
/// travel on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Correlation ID linking this command to its eventual result.
    pub correlation_id: String,
    /// Opaque command payload.
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    /// Topic this envelope is routed to.
    #[serde(skip, default)]
    pub target_topic: String,
}

impl CommandEnvelope {
    /// Build an envelope for the given topic.
    pub fn new(
        correlation_id: impl Into<String>,
        payload: Vec<u8>,
        target_topic: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload,
            created_at: Utc::now(),
            target_topic: target_topic.into(),
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

/// Outcome discriminator carried by a result message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReplyOutcome {
    /// The remote cluster handled the command.
    Succeeded {
        /// Opaque result payload, empty when the handler returned nothing.
        #[serde(with = "base64_bytes", default)]
        data: Vec<u8>,
    },
    /// The remote cluster rejected or failed the command.
    Failed {
        /// Machine-readable error code, when the remote side supplies one.
        #[serde(default)]
        code: Option<i32>,
        /// Human-readable error description.
        message: String,
    },
}

/// Inbound result consumed from a result topic. Transient, consumed once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultMessage {
    /// Correlation ID of the command this result answers.
    pub correlation_id: String,
    /// What happened remotely.
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

impl ResultMessage {
    /// Build a success result.
    pub fn succeeded(correlation_id: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: ReplyOutcome::Succeeded { data },
        }
    }

    /// Build a failure result.
    pub fn failed(
        correlation_id: impl Into<String>,
        code: Option<i32>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: ReplyOutcome::Failed {
                code,
                message: message.into(),
            },
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }
}

/// Serde adapter for base64-encoded byte payloads.
mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{Engine, BASE64};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
