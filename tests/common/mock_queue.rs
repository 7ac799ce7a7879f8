// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process [`EventQueue`] for replicator and service tests.
//!
//! Published operations are delivered to subscribers in publish order, with
//! increasing sequences. Acknowledgements are recorded instead of sent.

use catalog_replication::store::BoxFuture;
use catalog_replication::{
    Event, EventQueue, EventStream, Operation, ReplicationError, Result, Sequence,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub struct MockQueue {
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    stream: EventStream,
    next: AtomicU64,
    acked: Arc<Mutex<Vec<Sequence>>>,
    published: Mutex<Vec<Operation>>,
    fail_publish: AtomicBool,
}

impl MockQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            tx: Mutex::new(Some(tx)),
            stream: EventStream::new(rx),
            next: AtomicU64::new(1),
            acked: Arc::new(Mutex::new(Vec::new())),
            published: Mutex::new(Vec::new()),
            fail_publish: AtomicBool::new(false),
        }
    }

    /// Make every following publish fail with `NoConnection`.
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Deliver an operation without going through `publish`.
    pub async fn deliver(&self, operation: Operation) -> Sequence {
        let sequence = Sequence::new(self.next.fetch_add(1, Ordering::SeqCst), 0);
        let acked = Arc::clone(&self.acked);
        let event = Event::new(operation, sequence, move || {
            Box::pin(async move {
                acked.lock().push(sequence);
                Ok(())
            })
        });
        let tx = self.tx.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
        sequence
    }

    /// End the event stream once buffered events are drained.
    pub fn end_stream(&self) {
        self.tx.lock().take();
    }

    pub fn acked(&self) -> Vec<Sequence> {
        self.acked.lock().clone()
    }

    pub fn published(&self) -> Vec<Operation> {
        self.published.lock().clone()
    }

    /// Wait until `count` events have been acknowledged.
    pub async fn wait_for_acks(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.acked.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for acknowledgements");
    }
}

impl Default for MockQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue for MockQueue {
    fn publish(&self, operation: Operation) -> BoxFuture<'_, Sequence> {
        Box::pin(async move {
            if self.fail_publish.load(Ordering::SeqCst) {
                return Err(ReplicationError::NoConnection);
            }
            self.published.lock().push(operation.clone());
            Ok(self.deliver(operation).await)
        })
    }

    fn subscribe(&self) -> Result<EventStream> {
        Ok(self.stream.clone())
    }
}
