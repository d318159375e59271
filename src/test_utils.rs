//! Test utilities.
//!
//! In-process stand-ins for the remote processing cluster, used by the
//! end-to-end lifecycle tests.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::broker::MessageBroker;
use crate::wire::{CommandEnvelope, ResultMessage};

/// Spawn a stand-in remote cluster that answers every command with a
/// success result echoing the command payload, after `delay`.
///
/// Subscribes before returning, so commands published afterwards are
/// guaranteed to be seen.
pub(crate) async fn spawn_echo_responder(
    broker: Arc<dyn MessageBroker>,
    command_topic: &str,
    handled_topic: &str,
    delay: Duration,
) -> JoinHandle<()> {
    let group = format!("remote-processor-{}", Uuid::new_v4());
    let mut stream = broker
        .subscribe(&[command_topic.to_string()], &group)
        .await
        .expect("responder subscribe");
    let handled_topic = handled_topic.to_string();

    tokio::spawn(async move {
        while let Some(delivery) = stream.next().await {
            let Ok(envelope) = CommandEnvelope::decode(&delivery.payload) else {
                continue;
            };
            tokio::time::sleep(delay).await;

            let reply = ResultMessage::succeeded(&envelope.correlation_id, envelope.payload)
                .encode()
                .expect("encode reply");
            let _ = broker
                .publish(&handled_topic, envelope.correlation_id.as_bytes(), &reply)
                .await;
        }
    })
}

/// Spawn a stand-in remote cluster that rejects every command with the
/// given code and message on the failed-results topic.
pub(crate) async fn spawn_rejecting_responder(
    broker: Arc<dyn MessageBroker>,
    command_topic: &str,
    failed_topic: &str,
    code: i32,
    message: &str,
) -> JoinHandle<()> {
    let group = format!("remote-processor-{}", Uuid::new_v4());
    let mut stream = broker
        .subscribe(&[command_topic.to_string()], &group)
        .await
        .expect("responder subscribe");
    let failed_topic = failed_topic.to_string();
    let message = message.to_string();

    tokio::spawn(async move {
        while let Some(delivery) = stream.next().await {
            let Ok(envelope) = CommandEnvelope::decode(&delivery.payload) else {
                continue;
            };

            let reply = ResultMessage::failed(&envelope.correlation_id, Some(code), &message)
                .encode()
                .expect("encode reply");
            let _ = broker
                .publish(&failed_topic, envelope.correlation_id.as_bytes(), &reply)
                .await;
        }
    })
}
