//! Command dispatcher: the public entry point for submitting commands.
//!
//! A send registers the correlation before publishing and never leaves a
//! registry entry behind for a command that was not actually sent. The
//! dispatcher returns as soon as the broker confirms (or rejects) the
//! publish; resolution arrives later through the result listener or the
//! timeout sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::broker::{BrokerError, MessageBroker};
use crate::registry::{
    CommandOutcome, FailureInfo, PendingHandle, PendingRegistry, RegistryError,
};
use crate::utils::retry::RetryConfig;
use crate::wire::{CommandEnvelope, WireError};

/// Result type for send operations.
pub type Result<T> = std::result::Result<T, SendError>;

/// Errors that can occur submitting a command.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The subsystem is not open for submissions (not yet started, or
    /// shutting down).
    #[error("Dispatcher is closed")]
    Closed,

    /// Correlation ID collision; ID generation is broken. Fatal to this
    /// call only.
    #[error("Correlation '{0}' is already in flight")]
    DuplicateCorrelation(String),

    #[error("Envelope encoding failed: {0}")]
    Encode(#[from] WireError),

    #[error(transparent)]
    Publish(#[from] BrokerError),
}

/// Publishes commands and registers their correlations.
pub struct Dispatcher {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<PendingRegistry>,
    command_topic: String,
    default_timeout: Duration,
    retry: RetryConfig,
    accepting: AtomicBool,
}

impl Dispatcher {
    /// Create a dispatcher. Starts closed; the lifecycle controller opens
    /// it once the readiness barrier has passed.
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: Arc<PendingRegistry>,
        command_topic: impl Into<String>,
        default_timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            broker,
            registry,
            command_topic: command_topic.into(),
            default_timeout,
            retry,
            accepting: AtomicBool::new(false),
        }
    }

    /// Open the dispatcher for submissions.
    pub fn open(&self) {
        self.accepting.store(true, Ordering::Release);
    }

    /// Stop accepting submissions. In-flight correlations are unaffected.
    pub fn close(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Submit a command to the default command topic.
    pub async fn send(&self, payload: Vec<u8>, timeout: Duration) -> Result<PendingHandle> {
        let topic = self.command_topic.clone();
        self.send_to(&topic, payload, timeout).await
    }

    /// Submit a command with the configured default timeout.
    pub async fn send_default(&self, payload: Vec<u8>) -> Result<PendingHandle> {
        self.send(payload, self.default_timeout).await
    }

    /// Submit a command to a specific command topic.
    ///
    /// Returns a handle that settles asynchronously with the command's
    /// outcome; this call itself only waits for publish confirmation.
    pub async fn send_to(
        &self,
        topic: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<PendingHandle> {
        if !self.is_open() {
            return Err(SendError::Closed);
        }

        let correlation_id = Uuid::new_v4().to_string();

        let handle = self
            .registry
            .register(&correlation_id, timeout)
            .map_err(|RegistryError::DuplicateCorrelation(id)| {
                SendError::DuplicateCorrelation(id)
            })?;

        let envelope = CommandEnvelope::new(correlation_id.clone(), payload, topic);
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.registry.resolve(
                    &correlation_id,
                    CommandOutcome::Failed(FailureInfo::new(None, e.to_string())),
                );
                return Err(SendError::Encode(e));
            }
        };

        if let Err(e) = self
            .publish_with_retry(topic, correlation_id.as_bytes(), &bytes)
            .await
        {
            // Never leave an entry for a command that was never sent
            self.registry.resolve(
                &correlation_id,
                CommandOutcome::Failed(FailureInfo::new(None, format!("publish failed: {e}"))),
            );
            return Err(SendError::Publish(e));
        }

        debug!(
            correlation_id = %correlation_id,
            topic = %topic,
            timeout = ?timeout,
            "Command published"
        );

        Ok(handle)
    }

    /// Publish, retrying transient failures per the configured policy.
    async fn publish_with_retry(
        &self,
        topic: &str,
        key: &[u8],
        payload: &[u8],
    ) -> std::result::Result<(), BrokerError> {
        let mut attempt = 0;

        loop {
            match self.broker.publish(topic, key, payload).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        topic = %topic,
                        attempt,
                        error = %e,
                        retry_in = ?delay,
                        "Transient publish failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests;
