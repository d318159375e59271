use std::sync::Arc;

use super::*;

#[tokio::test]
async fn test_register_and_resolve() {
    let registry = PendingRegistry::new();
    let handle = registry.register("c-1", Duration::from_secs(5)).unwrap();

    assert!(registry.resolve("c-1", CommandOutcome::Succeeded(b"ok".to_vec())));
    assert_eq!(handle.outcome().await, CommandOutcome::Succeeded(b"ok".to_vec()));
    assert!(registry.is_empty());
}

#[test]
fn test_duplicate_register_fails_first_untouched() {
    let registry = PendingRegistry::new();
    let _handle = registry.register("c-1", Duration::from_secs(5)).unwrap();

    let err = registry.register("c-1", Duration::from_secs(5)).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateCorrelation(ref id) if id == "c-1"));

    // The first entry is still in flight
    assert_eq!(registry.len(), 1);
    assert!(registry.resolve("c-1", CommandOutcome::TimedOut));
}

#[test]
fn test_resolve_unknown_is_noop() {
    let registry = PendingRegistry::new();
    assert!(!registry.resolve("ghost", CommandOutcome::TimedOut));
}

#[tokio::test]
async fn test_resolve_after_terminal_is_noop() {
    let registry = PendingRegistry::new();
    let handle = registry.register("c-1", Duration::from_secs(5)).unwrap();

    assert!(registry.resolve("c-1", CommandOutcome::Succeeded(vec![])));
    // A late duplicate result must not raise or disturb anything
    assert!(!registry.resolve("c-1", CommandOutcome::Failed(FailureInfo::new(None, "late"))));

    assert_eq!(handle.outcome().await, CommandOutcome::Succeeded(vec![]));
}

#[tokio::test]
async fn test_sweep_expires_only_due_entries() {
    let registry = PendingRegistry::new();
    let due = registry.register("due", Duration::from_millis(0)).unwrap();
    let live = registry.register("live", Duration::from_secs(60)).unwrap();

    let expired = registry.sweep_expired(Instant::now());
    assert_eq!(expired, vec!["due".to_string()]);
    assert_eq!(registry.len(), 1);

    assert_eq!(due.outcome().await, CommandOutcome::TimedOut);

    assert!(registry.resolve("live", CommandOutcome::Succeeded(vec![])));
    assert_eq!(live.outcome().await, CommandOutcome::Succeeded(vec![]));
}

#[test]
fn test_sweep_returns_registry_to_empty() {
    let registry = PendingRegistry::new();
    for i in 0..50 {
        registry
            .register(&format!("c-{i}"), Duration::from_millis(0))
            .unwrap();
    }
    assert_eq!(registry.len(), 50);

    let expired = registry.sweep_expired(Instant::now());
    assert_eq!(expired.len(), 50);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_drain_cancels_all() {
    let registry = PendingRegistry::new();
    let h1 = registry.register("c-1", Duration::from_secs(60)).unwrap();
    let h2 = registry.register("c-2", Duration::from_secs(60)).unwrap();

    let mut drained = registry.drain_all();
    drained.sort();
    assert_eq!(drained, vec!["c-1".to_string(), "c-2".to_string()]);
    assert!(registry.is_empty());

    assert_eq!(h1.outcome().await, CommandOutcome::Cancelled);
    assert_eq!(h2.outcome().await, CommandOutcome::Cancelled);
}

#[tokio::test]
async fn test_dropped_handle_does_not_block_resolution() {
    let registry = PendingRegistry::new();
    let handle = registry.register("c-1", Duration::from_secs(5)).unwrap();
    drop(handle);

    // Transition still happens and the entry is removed
    assert!(registry.resolve("c-1", CommandOutcome::Succeeded(vec![])));
    assert!(registry.is_empty());
}

/// Race a result arrival against an already-due timeout sweep: exactly one
/// terminal transition must win.
#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_resolve_and_sweep_single_winner() {
    for _ in 0..50 {
        let registry = Arc::new(PendingRegistry::new());
        let handle = registry.register("c-1", Duration::from_millis(0)).unwrap();

        let resolver = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry.resolve("c-1", CommandOutcome::Succeeded(vec![]))
            })
        };
        let sweeper = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.sweep_expired(Instant::now()).len() })
        };

        let resolved = resolver.await.unwrap();
        let swept = sweeper.await.unwrap();

        assert!(
            resolved ^ (swept == 1),
            "exactly one of resolve/sweep must win (resolved={resolved}, swept={swept})"
        );
        assert!(registry.is_empty());

        let outcome = handle.outcome().await;
        if resolved {
            assert_eq!(outcome, CommandOutcome::Succeeded(vec![]));
        } else {
            assert_eq!(outcome, CommandOutcome::TimedOut);
        }
    }
}
