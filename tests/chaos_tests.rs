// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate failures and verify graceful degradation.
//!
//! These tests verify the system handles failures gracefully without panics,
//! deadlocks, or data corruption.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use catalog_replication::{
    Catalog, InMemoryCatalogStore, MemStore, Operation, OperationMethod, OperationType, Queue,
    QueueConfig, QueueState, ReplicationError, Replicator, ReplicatorState,
};
use common::{catalog, MockQueue};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::timeout;

/// Nothing listens on port 1.
fn unreachable_config(node_id: &str) -> QueueConfig {
    QueueConfig {
        connection_timeout: "200ms".to_string(),
        reconnect_interval: "50ms".to_string(),
        ..QueueConfig::for_testing(node_id, "redis://127.0.0.1:1")
    }
}

// =============================================================================
// Malformed Payloads
// =============================================================================

/// Test: Garbage payloads fail to decode without panicking
#[test]
fn malformed_payloads_no_panic() {
    let payloads: &[&[u8]] = &[
        b"",
        b"{",
        b"null",
        b"[]",
        b"\"catalogs\"",
        b"{\"type\": 42}",
        b"{\"method\": \"explode\"}",
        b"{\"catalog\": \"not an object\"}",
        &[0xFF, 0xFE, 0x00, 0x01],
    ];

    for (i, payload) in payloads.iter().enumerate() {
        let result = Operation::from_json(payload);
        assert!(
            matches!(result, Err(ReplicationError::Decode(_))),
            "payload {} should fail to decode, got {:?}",
            i,
            result
        );
    }
}

/// Test: Unknown fields and missing optional parts are tolerated
#[test]
fn partial_payloads_decode() {
    let op = Operation::from_json(
        br#"{"type":"catalogs","method":"delete","catalog":{"id":"7"},"extra":true}"#,
    )
    .unwrap();
    assert_eq!(op.method, OperationMethod::Delete);
    assert_eq!(op.record_id(), Some("7"));

    let op = Operation::from_json(br#"{"type":"pricing","method":"upsert"}"#).unwrap();
    assert!(op.catalog.is_none());
    assert!(!op.op_type.is_catalogs());
}

/// Test: Replicator keeps going after events it cannot apply
#[tokio::test]
async fn replicator_survives_bad_events() {
    let queue = Arc::new(MockQueue::new());
    let replicator = Arc::new(Replicator::new(
        Arc::new(InMemoryCatalogStore::new()),
        Arc::new(MemStore::new()),
        Arc::clone(&queue),
        vec![OperationType::catalogs()],
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let replicator = Arc::clone(&replicator);
        async move { replicator.replicate(shutdown_rx).await }
    });

    let mut foreign = Operation::upsert(catalog("f", "a", "Foreign"));
    foreign.op_type = OperationType::from("pricing");
    let mut empty = Operation::upsert(catalog("e", "a", "Empty"));
    empty.catalog = None;

    let no_id = queue.deliver(Operation::upsert(catalog("", "a", "NoId"))).await;
    let foreign = queue.deliver(foreign).await;
    let empty = queue.deliver(empty).await;
    let good = queue.deliver(Operation::upsert(catalog("1", "a", "Apple"))).await;

    // Ignored operations are acked, the invalid one is not
    queue.wait_for_acks(3).await;
    let acked = queue.acked();
    assert_eq!(acked, vec![foreign, empty, good]);
    assert!(!acked.contains(&no_id));
    assert_eq!(replicator.cache().len(), 1);
    assert!(replicator.cache().get("f").is_none());

    shutdown_tx.send(true).unwrap();
    task.await.unwrap().unwrap();
}

/// Test: Bootstrap failure still reaches readiness and streams
#[tokio::test]
async fn replicator_bootstrap_failure_still_streams() {
    let store = Arc::new(InMemoryCatalogStore::with_records(vec![
        catalog("1", "a", "Apple"),
        Catalog {
            id: String::new(),
            ..Default::default()
        },
    ]));
    let queue = Arc::new(MockQueue::new());
    let replicator = Arc::new(Replicator::new(
        store,
        Arc::new(MemStore::new()),
        Arc::clone(&queue),
        vec![OperationType::catalogs()],
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let replicator = Arc::clone(&replicator);
        async move { replicator.replicate(shutdown_rx).await }
    });

    let mut state = replicator.state_receiver();
    state
        .wait_for(|s| *s == ReplicatorState::Streaming)
        .await
        .unwrap();
    assert!(replicator.ready());

    queue.deliver(Operation::upsert(catalog("2", "b", "Banana"))).await;
    queue.wait_for_acks(1).await;
    assert!(replicator.cache().get("2").is_some());

    shutdown_tx.send(true).unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ReplicationError::InvalidOperation(_)));
}

// =============================================================================
// Unreachable Log Service
// =============================================================================

/// Test: Queue starts while Redis is down and fails publishes fast
#[tokio::test]
async fn queue_unreachable_fails_fast() {
    let queue = Queue::new(unreachable_config("chaos-a")).await.unwrap();
    assert_eq!(queue.state(), QueueState::Reconnecting);
    assert!(!queue.is_connected().await);

    let start = Instant::now();
    for i in 0..20 {
        let err = queue.publish(Operation::delete(i.to_string())).await.unwrap_err();
        assert!(matches!(err, ReplicationError::NoConnection));
    }
    assert!(start.elapsed() < Duration::from_secs(1));

    queue.close().await.unwrap();
    queue.close().await.unwrap();
    assert_eq!(queue.state(), QueueState::Closed);
    assert!(matches!(queue.subscribe(), Err(ReplicationError::QueueClosed)));
}

/// Test: Concurrent publishes while disconnected don't deadlock
#[tokio::test]
async fn queue_concurrent_publish_while_disconnected() {
    let queue = Arc::new(Queue::new(unreachable_config("chaos-b")).await.unwrap());

    let mut handles = Vec::new();
    for t in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            for i in 0..25 {
                let id = format!("{}-{}", t, i);
                assert!(queue.publish(Operation::delete(id)).await.is_err());
                tokio::task::yield_now().await;
            }
        }));
    }

    timeout(Duration::from_secs(5), async {
        for handle in handles {
            handle.await.unwrap();
        }
    })
    .await
    .expect("publishers deadlocked");

    timeout(Duration::from_secs(5), queue.close())
        .await
        .expect("close hung")
        .unwrap();
}

/// Test: Replicator over a disconnected queue stops cleanly on shutdown
#[tokio::test]
async fn replicator_over_unreachable_queue() {
    let queue = Arc::new(Queue::new(unreachable_config("chaos-c")).await.unwrap());
    let replicator = Arc::new(Replicator::new(
        Arc::new(InMemoryCatalogStore::with_records(vec![catalog("1", "a", "Apple")])),
        Arc::new(MemStore::new()),
        Arc::clone(&queue),
        vec![OperationType::catalogs()],
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let replicator = Arc::clone(&replicator);
        async move { replicator.replicate(shutdown_rx).await }
    });

    let mut state = replicator.state_receiver();
    state
        .wait_for(|s| *s == ReplicatorState::Streaming)
        .await
        .unwrap();
    // Served from the bootstrap even though the queue never connected
    assert_eq!(replicator.cache().get("1").unwrap().name, "Apple");

    // Let a few reconnect attempts fail
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(queue.state(), QueueState::Reconnecting);

    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(5), task)
        .await
        .expect("replicator did not stop")
        .unwrap()
        .unwrap();
    queue.close().await.unwrap();
}

/// Test: Closing the queue ends a running replicator with an error
#[tokio::test]
async fn queue_close_ends_replication() {
    let queue = Arc::new(Queue::new(unreachable_config("chaos-d")).await.unwrap());
    let replicator = Arc::new(Replicator::new(
        Arc::new(InMemoryCatalogStore::new()),
        Arc::new(MemStore::new()),
        Arc::clone(&queue),
        vec![OperationType::catalogs()],
    ));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn({
        let replicator = Arc::clone(&replicator);
        async move { replicator.replicate(shutdown_rx).await }
    });

    let mut state = replicator.state_receiver();
    state
        .wait_for(|s| *s == ReplicatorState::Streaming)
        .await
        .unwrap();
    queue.close().await.unwrap();

    let result = timeout(Duration::from_secs(5), task)
        .await
        .expect("replicator did not notice close")
        .unwrap();
    // Closing right after Streaming may beat the subscribe call
    assert!(matches!(
        result,
        Err(ReplicationError::StreamClosed | ReplicationError::QueueClosed)
    ));
}

/// Test: Dropping an unclosed queue stops its background tasks
#[tokio::test]
async fn queue_drop_without_close() {
    let queue = Queue::new(unreachable_config("chaos-e")).await.unwrap();
    let events = queue.subscribe().unwrap();
    drop(queue);

    let next = timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("stream did not end after drop");
    assert!(next.is_none());
}

// =============================================================================
// Cache Contention
// =============================================================================

/// Test: Readers never observe a broken index while writers churn
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cache_readers_during_writes() {
    let store = Arc::new(MemStore::new());
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut writers = Vec::new();
    for t in 0..4u32 {
        let store = Arc::clone(&store);
        writers.push(tokio::task::spawn_blocking(move || {
            for i in 0..2_000u32 {
                let id = format!("{}", (i * 7 + t) % 64);
                if i % 5 == 0 {
                    store.remove(&id);
                } else {
                    let category = format!("c{}", (i + t) % 6);
                    store.upsert(catalog(&id, &category, &format!("n{}", i)));
                }
            }
        }));
    }

    let reader = {
        let store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || {
            let mut checks = 0u64;
            while !*stop_rx.borrow() {
                for category in store.categories() {
                    // Categories may vanish between the two calls
                    let Some(records) = store.query(&category, "", false) else {
                        continue;
                    };
                    for record in records {
                        assert_eq!(record.category, category);
                    }
                    checks += 1;
                }
            }
            checks
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    stop_tx.send(true).unwrap();
    let checks = reader.await.unwrap();
    println!("Reader performed {} category checks", checks);

    for category in store.categories() {
        for id in store.category_ids(&category).unwrap() {
            assert_eq!(store.get(&id).unwrap().category, category);
        }
    }
}
