//! Pending request registry.
//!
//! The single serialization point for each in-flight correlation ID's state
//! machine: Waiting -> {Resolved | Expired | Cancelled}, each terminal.
//! Presence in the map means Waiting; an atomic remove is the terminal
//! transition, so whichever of result arrival, timeout sweep, or shutdown
//! drain removes an entry first is the only writer of its outcome.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur registering a correlation.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The correlation ID is already in flight. ID generation is broken;
    /// fatal to the offending send, not to the subsystem.
    #[error("Correlation '{0}' is already registered")]
    DuplicateCorrelation(String),
}

/// Failure details carried by a failed outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    /// Machine-readable error code, when the remote side supplies one.
    pub code: Option<i32>,
    /// Human-readable error description.
    pub message: String,
}

impl FailureInfo {
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The tagged result of a command, as delivered to the waiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The remote cluster handled the command.
    Succeeded(Vec<u8>),
    /// The remote cluster (or the local publish) failed the command.
    Failed(FailureInfo),
    /// No result arrived before the per-request deadline.
    TimedOut,
    /// The caller or shutdown withdrew the request before resolution.
    Cancelled,
}

/// One Waiting entry. Dropped (with its completion sender) at the terminal
/// transition.
struct PendingEntry {
    created_at: Instant,
    timeout_at: Instant,
    completion: oneshot::Sender<CommandOutcome>,
}

/// Caller-side handle to an in-flight command.
///
/// Settled exactly once; the outcome itself is `Clone`, so it can be read
/// freely after settlement.
#[derive(Debug)]
pub struct PendingHandle {
    correlation_id: String,
    completion: oneshot::Receiver<CommandOutcome>,
}

impl PendingHandle {
    /// The correlation ID this handle is waiting on.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Await the outcome.
    ///
    /// A registry torn down without draining (it is always drained during
    /// an orderly shutdown) reads as `Cancelled`.
    pub async fn outcome(self) -> CommandOutcome {
        match self.completion.await {
            Ok(outcome) => outcome,
            Err(_) => CommandOutcome::Cancelled,
        }
    }
}

/// Concurrent map from correlation ID to waiting entry.
///
/// All mutation of entry state goes through `register` / `resolve` /
/// `sweep_expired` / `drain_all`; no other component touches entries.
#[derive(Default)]
pub struct PendingRegistry {
    entries: DashMap<String, PendingEntry>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert a Waiting entry and return the caller's handle.
    ///
    /// Fails with `DuplicateCorrelation` if the ID is already in flight;
    /// the existing entry is untouched.
    pub fn register(&self, correlation_id: &str, timeout: Duration) -> Result<PendingHandle> {
        match self.entries.entry(correlation_id.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateCorrelation(
                correlation_id.to_string(),
            )),
            Entry::Vacant(slot) => {
                let (tx, rx) = oneshot::channel();
                let now = Instant::now();
                slot.insert(PendingEntry {
                    created_at: now,
                    timeout_at: now + timeout,
                    completion: tx,
                });
                Ok(PendingHandle {
                    correlation_id: correlation_id.to_string(),
                    completion: rx,
                })
            }
        }
    }

    /// Transition an entry to its terminal outcome.
    ///
    /// Returns false (a no-op, not an error) when the ID is unknown or
    /// already terminal: duplicate and late results are expected traffic.
    pub fn resolve(&self, correlation_id: &str, outcome: CommandOutcome) -> bool {
        match self.entries.remove(correlation_id) {
            Some((_, entry)) => {
                debug!(
                    correlation_id = %correlation_id,
                    waited = ?entry.created_at.elapsed(),
                    "Resolved pending command"
                );
                // The caller may have dropped the handle; the transition
                // still happened.
                let _ = entry.completion.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Expire every Waiting entry whose deadline has passed.
    ///
    /// Each expired waiter observes `TimedOut`. Returns the expired IDs.
    pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
        let due: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.timeout_at <= now)
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::with_capacity(due.len());
        for correlation_id in due {
            // remove_if re-checks under the shard lock; a concurrent resolve
            // between the scan and here wins cleanly.
            if let Some((id, entry)) = self
                .entries
                .remove_if(&correlation_id, |_, entry| entry.timeout_at <= now)
            {
                let _ = entry.completion.send(CommandOutcome::TimedOut);
                expired.push(id);
            }
        }

        expired
    }

    /// Cancel every remaining Waiting entry. Used at shutdown.
    ///
    /// Each drained waiter observes `Cancelled`. Returns the drained IDs.
    pub fn drain_all(&self) -> Vec<String> {
        let ids: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();

        let mut drained = Vec::with_capacity(ids.len());
        for correlation_id in ids {
            if let Some((id, entry)) = self.entries.remove(&correlation_id) {
                let _ = entry.completion.send(CommandOutcome::Cancelled);
                drained.push(id);
            }
        }

        drained
    }

    /// Number of in-flight correlations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests;
