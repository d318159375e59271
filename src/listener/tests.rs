use std::time::Duration;

use super::*;
use crate::broker::MockBroker;
use crate::registry::PendingRegistry;

const FAILED_TOPIC: &str = "results.failed";
const HANDLED_TOPIC: &str = "results.handled";

async fn started_listener(
    broker: Arc<MockBroker>,
    registry: Arc<PendingRegistry>,
) -> (Vec<tokio::task::JoinHandle<()>>, CancellationToken) {
    let groups = ResultGroups::for_instance("test", "instance-1");
    let listener = ResultListener::new(
        broker,
        registry,
        FAILED_TOPIC,
        HANDLED_TOPIC,
        &groups,
    );
    let cancel = CancellationToken::new();
    let tasks = listener.start(cancel.clone()).await.unwrap();
    (tasks, cancel)
}

#[tokio::test]
async fn test_success_result_resolves_handle() {
    let broker = Arc::new(MockBroker::new());
    let registry = Arc::new(PendingRegistry::new());
    let (_tasks, _cancel) = started_listener(Arc::clone(&broker), Arc::clone(&registry)).await;

    let handle = registry.register("c-1", Duration::from_secs(5)).unwrap();

    let payload = ResultMessage::succeeded("c-1", b"done".to_vec()).encode().unwrap();
    broker.inject(HANDLED_TOPIC, 0, &payload).await;

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.outcome())
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Succeeded(b"done".to_vec()));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_failure_result_resolves_handle() {
    let broker = Arc::new(MockBroker::new());
    let registry = Arc::new(PendingRegistry::new());
    let (_tasks, _cancel) = started_listener(Arc::clone(&broker), Arc::clone(&registry)).await;

    let handle = registry.register("c-2", Duration::from_secs(5)).unwrap();

    let payload = ResultMessage::failed("c-2", Some(409), "rejected").encode().unwrap();
    broker.inject(FAILED_TOPIC, 1, &payload).await;

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.outcome())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        CommandOutcome::Failed(FailureInfo::new(Some(409), "rejected"))
    );
}

#[tokio::test]
async fn test_poison_message_does_not_stall_pump() {
    let broker = Arc::new(MockBroker::new());
    let registry = Arc::new(PendingRegistry::new());
    let (_tasks, _cancel) = started_listener(Arc::clone(&broker), Arc::clone(&registry)).await;

    let handle = registry.register("c-3", Duration::from_secs(5)).unwrap();

    // Garbage first, then a valid result behind it
    broker.inject(HANDLED_TOPIC, 0, b"not json at all").await;
    let payload = ResultMessage::succeeded("c-3", vec![]).encode().unwrap();
    broker.inject(HANDLED_TOPIC, 0, &payload).await;

    let outcome = tokio::time::timeout(Duration::from_secs(1), handle.outcome())
        .await
        .unwrap();
    assert_eq!(outcome, CommandOutcome::Succeeded(vec![]));
}

#[tokio::test]
async fn test_unknown_correlation_is_noop() {
    let broker = Arc::new(MockBroker::new());
    let registry = Arc::new(PendingRegistry::new());
    let (_tasks, _cancel) = started_listener(Arc::clone(&broker), Arc::clone(&registry)).await;

    let handle = registry.register("mine", Duration::from_secs(5)).unwrap();

    // A result for some other instance's correlation
    let payload = ResultMessage::succeeded("theirs", vec![]).encode().unwrap();
    broker.inject(HANDLED_TOPIC, 2, &payload).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    // Our entry is untouched
    assert_eq!(registry.len(), 1);

    registry.resolve("mine", CommandOutcome::Cancelled);
    assert_eq!(handle.outcome().await, CommandOutcome::Cancelled);
}

#[tokio::test]
async fn test_results_arrive_out_of_order() {
    let broker = Arc::new(MockBroker::new());
    let registry = Arc::new(PendingRegistry::new());
    let (_tasks, _cancel) = started_listener(Arc::clone(&broker), Arc::clone(&registry)).await;

    let h1 = registry.register("first", Duration::from_secs(5)).unwrap();
    let h2 = registry.register("second", Duration::from_secs(5)).unwrap();

    // Second command's result lands first, on a different partition
    let p2 = ResultMessage::succeeded("second", b"2".to_vec()).encode().unwrap();
    broker.inject(HANDLED_TOPIC, 3, &p2).await;
    let p1 = ResultMessage::succeeded("first", b"1".to_vec()).encode().unwrap();
    broker.inject(HANDLED_TOPIC, 0, &p1).await;

    assert_eq!(
        tokio::time::timeout(Duration::from_secs(1), h2.outcome()).await.unwrap(),
        CommandOutcome::Succeeded(b"2".to_vec())
    );
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(1), h1.outcome()).await.unwrap(),
        CommandOutcome::Succeeded(b"1".to_vec())
    );
}

#[tokio::test]
async fn test_cancel_stops_pumps() {
    let broker = Arc::new(MockBroker::new());
    let registry = Arc::new(PendingRegistry::new());
    let (tasks, cancel) = started_listener(broker, registry).await;

    cancel.cancel();
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pump should stop promptly")
            .unwrap();
    }
}
