use super::*;
use crate::broker::MockBroker;

fn dispatcher_with(broker: Arc<MockBroker>) -> (Dispatcher, Arc<PendingRegistry>) {
    let registry = Arc::new(PendingRegistry::new());
    let dispatcher = Dispatcher::new(
        broker,
        Arc::clone(&registry),
        "commands",
        Duration::from_secs(30),
        RetryConfig::no_retries(),
    );
    (dispatcher, registry)
}

#[tokio::test]
async fn test_send_registers_and_publishes() {
    let broker = Arc::new(MockBroker::new());
    let (dispatcher, registry) = dispatcher_with(Arc::clone(&broker));
    dispatcher.open();

    let handle = dispatcher
        .send(b"create-order".to_vec(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(registry.len(), 1);

    let published = broker.take_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "commands");
    // Partition key is the correlation ID
    assert_eq!(published[0].key, handle.correlation_id().as_bytes());

    let envelope = CommandEnvelope::decode(&published[0].payload).unwrap();
    assert_eq!(envelope.correlation_id, handle.correlation_id());
    assert_eq!(envelope.payload, b"create-order");
}

#[tokio::test]
async fn test_send_closed_fails_fast() {
    let broker = Arc::new(MockBroker::new());
    let (dispatcher, registry) = dispatcher_with(Arc::clone(&broker));

    let err = dispatcher
        .send(b"x".to_vec(), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::Closed));
    assert!(registry.is_empty());
    assert_eq!(broker.published_count().await, 0);
}

#[tokio::test]
async fn test_publish_failure_leaves_no_entry() {
    let broker = Arc::new(MockBroker::new());
    broker.set_fail_on_publish(true).await;
    let (dispatcher, registry) = dispatcher_with(Arc::clone(&broker));
    dispatcher.open();

    let started = std::time::Instant::now();
    let err = dispatcher
        .send(b"x".to_vec(), Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, SendError::Publish(_)));
    // Fails immediately, not after the request timeout
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_close_stops_new_sends() {
    let broker = Arc::new(MockBroker::new());
    let (dispatcher, _registry) = dispatcher_with(broker);
    dispatcher.open();
    assert!(dispatcher.is_open());

    dispatcher.close();
    let err = dispatcher
        .send(b"x".to_vec(), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, SendError::Closed));
}

#[tokio::test]
async fn test_each_send_gets_fresh_correlation() {
    let broker = Arc::new(MockBroker::new());
    let (dispatcher, _registry) = dispatcher_with(broker);
    dispatcher.open();

    let h1 = dispatcher
        .send(b"a".to_vec(), Duration::from_secs(5))
        .await
        .unwrap();
    let h2 = dispatcher
        .send(b"b".to_vec(), Duration::from_secs(5))
        .await
        .unwrap();

    assert_ne!(h1.correlation_id(), h2.correlation_id());
}

#[tokio::test]
async fn test_send_to_overrides_topic() {
    let broker = Arc::new(MockBroker::new());
    let (dispatcher, _registry) = dispatcher_with(Arc::clone(&broker));
    dispatcher.open();

    dispatcher
        .send_to("billing.commands", b"charge".to_vec(), Duration::from_secs(5))
        .await
        .unwrap();

    let published = broker.take_published().await;
    assert_eq!(published[0].topic, "billing.commands");
}
