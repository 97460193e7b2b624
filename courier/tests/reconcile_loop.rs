//! Reconciliation cycles and the background loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier::*;
use courier_testkit::{broker_with_config, InMemoryJobStore, MockQueue};
use serde_json::json;

fn fast_config(batch_size: usize) -> BrokerConfig {
    BrokerConfig {
        reconciler: ReconcilerConfig::default()
            .with_interval(10)
            .with_batch_size(batch_size),
        ..BrokerConfig::default()
    }
}

async fn create_due(store: &InMemoryJobStore, n: usize) -> Vec<JobId> {
    let mut ids = Vec::new();
    for i in 0..n {
        let record = store
            .create(NewJob::scheduled(
                "reports",
                json!({ "n": i }),
                Utc::now() - chrono::Duration::seconds(10),
            ))
            .await
            .expect("create");
        ids.push(record.id);
    }
    ids
}

#[tokio::test]
async fn cycle_respects_batch_size() {
    let store = InMemoryJobStore::new();
    let queue = MockQueue::new();
    let broker = broker_with_config(
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        fast_config(2),
    );
    create_due(&store, 5).await;

    let first = broker.reconciler().run_cycle().await.expect("cycle");
    assert_eq!(first.candidates, 2);
    assert_eq!(first.dispatched, 2);

    broker.reconciler().run_cycle().await.expect("cycle");
    broker.reconciler().run_cycle().await.expect("cycle");
    queue.assert_push_count_eq(5);

    assert!(store.records().iter().all(|r| r.backend_id.is_some()));
}

#[tokio::test]
async fn cycle_continues_past_failed_records() {
    let store = InMemoryJobStore::new();
    let queue = MockQueue::failing(1);
    let broker = broker_with_config(
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        fast_config(100),
    );
    let ids = create_due(&store, 3).await;

    let report = broker.reconciler().run_cycle().await.expect("cycle");
    assert_eq!(report.candidates, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 2);

    let failed = store.record(ids[0]).expect("record");
    assert!(failed.backend_id.is_none());
    assert_eq!(failed.dispatch_attempts, 1);

    let report = broker.reconciler().run_cycle().await.expect("cycle");
    assert_eq!(report.dispatched, 1);
    queue.assert_push_count_eq(3);
}

#[tokio::test]
async fn lock_timeout_counts_as_failed_and_retries_next_cycle() {
    let store = InMemoryJobStore::new();
    let queue = MockQueue::new();
    let broker = broker_with_config(
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        fast_config(100),
    );
    let ids = create_due(&store, 2).await;

    store.inject_lock_timeouts(1);
    let report = broker.reconciler().run_cycle().await.expect("cycle");
    assert_eq!(report.candidates, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.dispatched, 1);
    queue.assert_push_count_eq(1);

    let timed_out = store.record(ids[0]).expect("record");
    assert!(timed_out.backend_id.is_none());
    assert_eq!(timed_out.dispatch_attempts, 0);

    let report = broker.reconciler().run_cycle().await.expect("cycle");
    assert_eq!(report.candidates, 1);
    assert_eq!(report.dispatched, 1);
    queue.assert_push_count_eq(2);
}

#[tokio::test]
async fn cycle_skips_records_dispatched_since_snapshot() {
    let store = InMemoryJobStore::new();
    let queue = MockQueue::new();
    let engine = DispatchEngine::new(Arc::new(store.clone()), Arc::new(queue.clone()));
    let ids = create_due(&store, 1).await;

    let stale_snapshot = store
        .due_undispatched(Utc::now(), 10)
        .await
        .expect("snapshot");
    assert_eq!(stale_snapshot, ids);

    engine
        .dispatch(ids[0], DispatchPath::Inline)
        .await
        .expect("dispatch");

    let outcome = engine
        .dispatch(stale_snapshot[0], DispatchPath::Reconcile)
        .await
        .expect("dispatch");
    assert!(matches!(outcome, DispatchOutcome::AlreadyDispatched(_)));
    queue.assert_push_count_eq(1);
}

#[tokio::test]
async fn not_due_record_is_left_alone() {
    let store = InMemoryJobStore::new();
    let queue = MockQueue::new();
    let engine = DispatchEngine::new(Arc::new(store.clone()), Arc::new(queue.clone()));
    let record = store
        .create(NewJob::scheduled(
            "reports",
            json!({}),
            Utc::now() + chrono::Duration::minutes(10),
        ))
        .await
        .expect("create");

    let outcome = engine
        .dispatch(record.id, DispatchPath::Reconcile)
        .await
        .expect("dispatch");
    assert!(matches!(outcome, DispatchOutcome::NotDue(_)));
    queue.assert_push_count_eq(0);
}

#[tokio::test]
async fn dispatching_unknown_record_is_not_found() {
    let store = InMemoryJobStore::new();
    let engine = DispatchEngine::new(Arc::new(store), Arc::new(MockQueue::new()));

    let err = engine
        .dispatch(JobId(404), DispatchPath::Reconcile)
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Store(StoreError::NotFound)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn background_loop_dispatches_and_stops_on_shutdown() {
    let store = InMemoryJobStore::new();
    let queue = MockQueue::new();
    let broker = broker_with_config(
        Arc::new(store.clone()),
        Arc::new(queue.clone()),
        fast_config(100),
    );

    let record = broker
        .enqueue(
            "reports",
            json!({"later": true}),
            Some(Utc::now() + chrono::Duration::milliseconds(50)),
        )
        .await
        .expect("enqueue");
    assert!(record.backend_id.is_none());

    broker.spawn_reconciler().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while queue.push_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "reconciler never dispatched");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    broker.shutdown().await.expect("shutdown");
    assert!(broker.shutdown_token().is_cancelled());

    assert!(store.record(record.id).and_then(|r| r.backend_id).is_some());

    let pending = broker
        .enqueue(
            "reports",
            json!({"after": "shutdown"}),
            Some(Utc::now() + chrono::Duration::milliseconds(20)),
        )
        .await
        .expect("enqueue");
    tokio::time::sleep(Duration::from_millis(100)).await;
    queue.assert_push_count_eq(1);
    assert!(store.record(pending.id).and_then(|r| r.backend_id).is_none());
}
