//! Result listener: consumes the result topics and resolves correlations.
//!
//! Each result topic is consumed under its own per-instance consumer
//! group, so every instance observes every result and simply ignores
//! correlation IDs it does not own. Arrival order across partitions
//! carries no meaning; correlation is purely by ID.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerError, Delivery, MessageBroker};
use crate::registry::{CommandOutcome, FailureInfo, PendingRegistry};
use crate::wire::{ReplyOutcome, ResultMessage};

/// Consumer-group names for the two result topics, unique per instance.
///
/// Mirrors the deployment convention that result groups are never shared:
/// a shared group would split partitions between instances and strand
/// results for commands the other instance sent.
#[derive(Debug, Clone)]
pub struct ResultGroups {
    pub failed: String,
    pub handled: String,
}

impl ResultGroups {
    /// Derive group names from a configured prefix and an instance ID.
    pub fn for_instance(prefix: &str, instance_id: &str) -> Self {
        Self {
            failed: format!("{prefix}-failed-{instance_id}"),
            handled: format!("{prefix}-handled-{instance_id}"),
        }
    }
}

/// One result-topic subscription: topic name plus its consumer group.
struct Subscription {
    topic: String,
    group: String,
}

/// Consumes result messages and resolves the pending registry.
pub struct ResultListener {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<PendingRegistry>,
    subscriptions: Vec<Subscription>,
}

impl ResultListener {
    /// Create a listener for the failed- and handled-result topics.
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: Arc<PendingRegistry>,
        failed_topic: impl Into<String>,
        handled_topic: impl Into<String>,
        groups: &ResultGroups,
    ) -> Self {
        Self {
            broker,
            registry,
            subscriptions: vec![
                Subscription {
                    topic: failed_topic.into(),
                    group: groups.failed.clone(),
                },
                Subscription {
                    topic: handled_topic.into(),
                    group: groups.handled.clone(),
                },
            ],
        }
    }

    /// Subscribe to every result topic and spawn one pump task per
    /// subscription. Pumps run until the token fires or the broker closes
    /// the stream.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, BrokerError> {
        let mut tasks = Vec::with_capacity(self.subscriptions.len());

        for subscription in &self.subscriptions {
            let mut stream = self
                .broker
                .subscribe(std::slice::from_ref(&subscription.topic), &subscription.group)
                .await?;

            info!(
                topic = %subscription.topic,
                group = %subscription.group,
                "Result listener subscribed"
            );

            let registry = Arc::clone(&self.registry);
            let cancel = cancel.clone();
            let topic = subscription.topic.clone();

            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!(topic = %topic, "Result listener stopping");
                            break;
                        }
                        delivery = stream.next() => {
                            match delivery {
                                Some(delivery) => process_delivery(&registry, delivery),
                                None => {
                                    info!(topic = %topic, "Result stream closed");
                                    break;
                                }
                            }
                        }
                    }
                }
            }));
        }

        Ok(tasks)
    }
}

/// Decode one delivery and resolve its correlation.
///
/// Malformed messages are logged and skipped; they must never stall the
/// pump or escalate.
fn process_delivery(registry: &PendingRegistry, delivery: Delivery) {
    let message = match ResultMessage::decode(&delivery.payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                topic = %delivery.topic,
                partition = delivery.partition,
                error = %e,
                "Dropping undecodable result message"
            );
            return;
        }
    };

    let outcome = match message.outcome {
        ReplyOutcome::Succeeded { data } => CommandOutcome::Succeeded(data),
        ReplyOutcome::Failed { code, message } => {
            CommandOutcome::Failed(FailureInfo::new(code, message))
        }
    };

    if !registry.resolve(&message.correlation_id, outcome) {
        // Late, duplicate, or another instance's result; expected traffic
        debug!(
            correlation_id = %message.correlation_id,
            topic = %delivery.topic,
            "Result for unknown or already-terminal correlation"
        );
    }
}

#[cfg(test)]
mod tests;
