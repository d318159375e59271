//! Partition readiness tracking and the startup barrier.
//!
//! Commands must not be published until every partition of the result
//! topics is assigned to this instance's consumer groups; a result landing
//! on an unassigned partition during startup would be silently lost. The
//! barrier polls the broker until the assignment is complete, with an
//! explicit deadline and cancellation so a misconfigured cluster can never
//! hang the process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{BrokerError, MessageBroker};

/// Result type for readiness operations.
pub type Result<T> = std::result::Result<T, ReadinessError>;

/// Errors that can occur waiting for readiness.
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    /// Full partition assignment was not observed within the window.
    /// Fatal to subsystem startup.
    #[error("Partition assignment incomplete after {waited:?}")]
    Timeout { waited: Duration },

    /// The operator aborted startup.
    #[error("Readiness wait cancelled")]
    Cancelled,

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// One consumer group to monitor, with the partition count it must hold.
///
/// The expected count is configuration reflecting the topic's partition
/// count; it is deliberately not discovered from the broker, so a
/// half-created topic reads as not-ready rather than trivially ready.
#[derive(Debug, Clone)]
pub struct GroupExpectation {
    pub group: String,
    pub expected_partitions: usize,
}

impl GroupExpectation {
    pub fn new(group: impl Into<String>, expected_partitions: usize) -> Self {
        Self {
            group: group.into(),
            expected_partitions,
        }
    }
}

/// Observes consumer groups and reports whether every monitored group
/// holds all of its expected partitions.
///
/// Holds no mutable state; every call queries the broker afresh and is
/// safe to issue concurrently.
pub struct ReadinessTracker {
    broker: Arc<dyn MessageBroker>,
    groups: Vec<GroupExpectation>,
}

impl ReadinessTracker {
    pub fn new(broker: Arc<dyn MessageBroker>, groups: Vec<GroupExpectation>) -> Self {
        Self { broker, groups }
    }

    /// True only when every monitored group's assigned-partition count
    /// equals its expected count.
    pub async fn is_ready(&self) -> Result<bool> {
        for expectation in &self.groups {
            let assigned = self.broker.assigned_partitions(&expectation.group).await?;

            if assigned.len() != expectation.expected_partitions {
                debug!(
                    group = %expectation.group,
                    assigned = assigned.len(),
                    expected = expectation.expected_partitions,
                    "Group not fully assigned"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Block the calling task until ready, on a fixed polling schedule.
    ///
    /// A one-time startup gate, not a steady-state operation. Returns
    /// `Timeout` once `max_wait` elapses without full assignment and
    /// `Cancelled` if the token fires first.
    pub async fn wait_until_ready(
        &self,
        poll_interval: Duration,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = started + max_wait;
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
                _ = ticker.tick() => {
                    if self.is_ready().await? {
                        info!(waited = ?started.elapsed(), "All result partitions assigned");
                        return Ok(());
                    }
                    if Instant::now() >= deadline {
                        return Err(ReadinessError::Timeout { waited: max_wait });
                    }
                }
            }
        }
    }
}
