// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivered events and the shared output stream.

use super::types::Sequence;
use crate::error::Result;
use crate::model::Operation;
use crate::store::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

type AckFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// An [`Operation`] as delivered by the queue.
///
/// Carries the delivery sequence and a single-use acknowledgement. Until
/// [`ack()`](Event::ack) succeeds, the queue redelivers the event once its
/// ack-wait elapses.
pub struct Event {
    operation: Operation,
    sequence: Sequence,
    ack: AckFn,
}

impl Event {
    pub fn new<F>(operation: Operation, sequence: Sequence, ack: F) -> Self
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        Self {
            operation,
            sequence,
            ack: Box::new(ack),
        }
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Confirm successful processing. Consumes the event.
    pub async fn ack(self) -> Result<()> {
        (self.ack)().await
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("operation", &self.operation)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Read side of a queue's output channel.
///
/// Clones share one underlying receiver: each event goes to exactly one
/// reader. `recv` returns `None` once the queue is closed.
#[derive(Clone)]
pub struct EventStream {
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Wait for the next event.
    pub async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Catalog;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_ack_runs_once() {
        let acks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&acks);
        let event = Event::new(
            Operation::delete("x"),
            Sequence::new(10, 1),
            move || {
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            },
        );

        assert_eq!(event.sequence(), Sequence::new(10, 1));
        assert_eq!(event.operation().record_id(), Some("x"));
        event.ack().await.unwrap();
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ack_error_is_returned() {
        let event = Event::new(
            Operation::upsert(Catalog::with_id("y")),
            Sequence::ZERO,
            || Box::pin(async { Err(crate::ReplicationError::NoConnection) }),
        );
        assert!(event.ack().await.is_err());
    }

    #[tokio::test]
    async fn test_stream_clones_share_receiver() {
        let (tx, rx) = mpsc::channel(4);
        let stream = EventStream::new(rx);
        let other = stream.clone();

        let noop = || -> BoxFuture<'static, ()> { Box::pin(async { Ok(()) }) };
        tx.send(Event::new(Operation::delete("a"), Sequence::new(1, 0), noop))
            .await
            .unwrap();
        tx.send(Event::new(Operation::delete("b"), Sequence::new(2, 0), noop))
            .await
            .unwrap();
        drop(tx);

        assert_eq!(stream.recv().await.unwrap().sequence(), Sequence::new(1, 0));
        assert_eq!(other.recv().await.unwrap().sequence(), Sequence::new(2, 0));
        assert!(stream.recv().await.is_none());
    }
}
