// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change queue over Redis Streams.
//!
//! Carries [`Operation`]s from any number of publishers to every node's
//! replicator with ordered, resumable, at-least-once delivery.
//!
//! # Architecture
//!
//! ```text
//!   publish ──XADD──→ ┌────────────────────────────┐
//!                     │ stream {cluster}:{subject} │
//!                     └──────────┬─────────────────┘
//!                                │ XAUTOCLAIM / XREADGROUP (group = node id)
//!                                ↓
//!                   delivery task (at most one at a time)
//!                                │ decode, advance resume point
//!                                ↓ input (capacity 1)
//!                        forwarding task
//!                                │
//!                                ↓ output (capacity 1)
//!                          EventStream ──→ consumer ──ack──→ XACK
//! ```
//!
//! Both channels hold one event, so a slow consumer backs pressure up to
//! the Redis read instead of buffering.
//!
//! # Connection Recovery
//!
//! Any error from the delivery loop (and a connection-class error from
//! `publish` or an ack) drops the held connection and starts a reconnect
//! task. It stops and joins the running delivery task, then retries on a
//! fixed interval until it succeeds or the queue is closed. The consumer
//! never sees the replacement: the same [`EventStream`] keeps yielding
//! events, resuming strictly after the last observed sequence.
//!
//! # Shutdown
//!
//! [`Queue::close()`] signals every background task through one shared
//! `done` channel, joins them, drops the connection and closes the output
//! stream. Calling it again is a no-op.

mod delivery;
mod event;
mod types;

pub use delivery::{
    parse_autoclaim_reply, AutoclaimReply, RawEntry, StreamConsumer, PAYLOAD_FIELD,
};
pub use event::{Event, EventStream};
pub use types::{QueueState, Sequence};

use crate::config::QueueConfig;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::model::Operation;
use crate::store::BoxFuture;
use chrono::Utc;
use futures::FutureExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Publish/subscribe contract consumed by the replicator and the service
/// layer.
///
/// [`Queue`] is the Redis implementation; tests substitute in-process ones.
pub trait EventQueue: Send + Sync + 'static {
    /// Publish an operation. Fails immediately when no connection is held.
    fn publish(&self, operation: Operation) -> BoxFuture<'_, Sequence>;

    /// The shared stream of delivered events. Fails once closed.
    fn subscribe(&self) -> Result<EventStream>;
}

/// Wait until a shutdown flag turns `true`.
///
/// A dropped sender never signals.
pub(crate) async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Redis Streams change queue.
///
/// # Example
///
/// ```rust,no_run
/// use catalog_replication::config::QueueConfig;
/// use catalog_replication::model::{Catalog, Operation};
/// use catalog_replication::queue::Queue;
///
/// # async fn example() -> catalog_replication::Result<()> {
/// let queue = Queue::new(QueueConfig::default()).await?;
/// let events = queue.subscribe()?;
///
/// queue.publish(Operation::upsert(Catalog::with_id("42"))).await?;
///
/// if let Some(event) = events.recv().await {
///     println!("{:?} at {}", event.operation().method, event.sequence());
///     event.ack().await?;
/// }
///
/// queue.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Queue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    client: redis::Client,
    consumer: StreamConsumer,

    /// Publish/ack connection. Delivery owns its own.
    conn: RwLock<Option<ConnectionManager>>,
    state: parking_lot::Mutex<QueueState>,

    /// Highest sequence handed to the consumer. Only moves forward.
    resume_from: parking_lot::Mutex<Option<Sequence>>,

    input_tx: mpsc::Sender<Event>,
    /// Kept so a write-only queue's stream also ends at close.
    output_tx: parking_lot::Mutex<Option<mpsc::Sender<Event>>>,
    stream: EventStream,

    done_tx: watch::Sender<bool>,
    closed: AtomicBool,
    reconnecting: AtomicBool,

    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    /// Failures of tasks that finished before close.
    task_failures: parking_lot::Mutex<Vec<ReplicationError>>,

    /// The single running delivery task, if any.
    delivery: parking_lot::Mutex<Option<DeliveryTask>>,
}

/// A delivery task and its private stop signal.
struct DeliveryTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Queue {
    /// Create the queue and attempt the first connection.
    ///
    /// Only an invalid config fails. If the log service is unreachable the
    /// queue starts in `Reconnecting` and keeps retrying in the background.
    pub async fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| {
                ReplicationError::Config(format!("invalid queue url {}: {}", config.url, e))
            })?;

        let consumer = StreamConsumer::new(
            config.stream_key(),
            config.node_id.clone(),
            config.ack_wait_duration(),
            config.block_timeout_duration(),
        );

        let (input_tx, input_rx) = mpsc::channel(1);
        let (output_tx, output_rx) = mpsc::channel(1);
        let (done_tx, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            client,
            consumer,
            conn: RwLock::new(None),
            state: parking_lot::Mutex::new(QueueState::Disconnected),
            resume_from: parking_lot::Mutex::new(None),
            input_tx,
            output_tx: parking_lot::Mutex::new(Some(output_tx.clone())),
            stream: EventStream::new(output_rx),
            done_tx,
            closed: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            tasks: parking_lot::Mutex::new(Vec::new()),
            task_failures: parking_lot::Mutex::new(Vec::new()),
            delivery: parking_lot::Mutex::new(None),
            config,
        });
        metrics::set_queue_state(&QueueState::Disconnected.to_string());

        if !inner.config.write_only {
            let done = inner.done_tx.subscribe();
            inner.spawn_supervised(forward(input_rx, output_tx, done));
        } else {
            drop(output_tx);
        }

        if let Err(e) = inner.connect().await {
            warn!(
                node_id = %inner.config.node_id,
                url = %inner.config.url,
                error = %e,
                "Initial change queue connection failed, retrying in background"
            );
            inner.connection_lost(&e);
        }

        Ok(Self { inner })
    }

    /// Publish an operation on the configured subject.
    ///
    /// Stamps `operation.timestamp` with the current time, then appends the
    /// JSON payload to the stream. Returns the assigned sequence.
    ///
    /// Never waits for a connection: fails with
    /// [`ReplicationError::NoConnection`] while disconnected.
    pub async fn publish(&self, mut operation: Operation) -> Result<Sequence> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ReplicationError::QueueClosed);
        }
        let mut conn = self
            .inner
            .connection()
            .await
            .ok_or(ReplicationError::NoConnection)?;

        operation.timestamp = Utc::now();
        let payload = operation.to_json()?;

        let start = Instant::now();
        let result: Result<String> = conn
            .xadd(
                self.inner.consumer.stream_key(),
                "*",
                &[(PAYLOAD_FIELD, payload.as_str())],
            )
            .await
            .map_err(|e| ReplicationError::redis("XADD", e));
        metrics::record_publish(&self.inner.config.subject, result.is_ok(), start.elapsed());

        match result {
            Ok(id) => {
                let sequence = Sequence::parse(&id)?;
                debug!(
                    stream = %self.inner.consumer.stream_key(),
                    sequence = %sequence,
                    method = %operation.method,
                    record_id = operation.record_id().unwrap_or(""),
                    "Published operation"
                );
                Ok(sequence)
            }
            Err(e) => {
                if e.is_connection_lost() {
                    self.inner.connection_lost(&e);
                }
                Err(e)
            }
        }
    }

    /// The shared output stream. Every call returns a handle to the same
    /// stream.
    pub fn subscribe(&self) -> Result<EventStream> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ReplicationError::QueueClosed);
        }
        Ok(self.inner.stream.clone())
    }

    /// Close the queue.
    ///
    /// Signals and joins every background task, drops the connection and
    /// closes the output stream. Failed tasks are reported together in
    /// [`ReplicationError::Close`]. Closing twice returns `Ok(())`.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(node_id = %self.inner.config.node_id, "Closing change queue");
        self.inner.done_tx.send_replace(true);

        let mut join_errors = Vec::new();

        // Tasks may spawn successors until they observe `done`, so drain
        // until nothing is left. No lock is held while joining.
        loop {
            let mut handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
            let delivery = self.inner.delivery.lock().take();
            if let Some(delivery) = delivery {
                handles.push(delivery.handle);
            }
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Change queue task failed during shutdown");
                    join_errors.push(ReplicationError::Internal(format!(
                        "background task failed: {}",
                        e
                    )));
                }
            }
        }

        let mut errors: Vec<ReplicationError> =
            std::mem::take(&mut *self.inner.task_failures.lock());
        errors.extend(join_errors);

        self.inner.conn.write().await.take();
        self.inner.output_tx.lock().take();
        self.inner.set_state(QueueState::Closed);

        if errors.is_empty() {
            info!(node_id = %self.inner.config.node_id, "Change queue closed");
            Ok(())
        } else {
            error!(
                node_id = %self.inner.config.node_id,
                failures = errors.len(),
                "Change queue closed with errors"
            );
            Err(ReplicationError::Close { errors })
        }
    }

    pub fn state(&self) -> QueueState {
        *self.inner.state.lock()
    }

    /// Whether a connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.inner.conn.read().await.is_some()
    }

    /// Last sequence handed to the consumer, if any.
    pub fn resume_point(&self) -> Option<Sequence> {
        *self.inner.resume_from.lock()
    }

    pub fn node_id(&self) -> &str {
        &self.inner.config.node_id
    }

    pub fn stream_key(&self) -> &str {
        self.inner.consumer.stream_key()
    }
}

impl EventQueue for Queue {
    fn publish(&self, operation: Operation) -> BoxFuture<'_, Sequence> {
        Box::pin(Queue::publish(self, operation))
    }

    fn subscribe(&self) -> Result<EventStream> {
        Queue::subscribe(self)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Stop background tasks even if close() was never called.
        self.inner.done_tx.send_replace(true);
    }
}

impl Inner {
    async fn connection(&self) -> Option<ConnectionManager> {
        self.conn.read().await.clone()
    }

    fn set_state(&self, state: QueueState) {
        *self.state.lock() = state;
        metrics::set_queue_state(&state.to_string());
    }

    /// Spawn a task that close() will join. Refused once closed.
    fn spawn_supervised<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        // Reap finished tasks so reconnect cycles don't accumulate handles.
        let mut running = Vec::with_capacity(tasks.len() + 1);
        for handle in tasks.drain(..) {
            if !handle.is_finished() {
                running.push(handle);
                continue;
            }
            if let Some(Err(e)) = handle.now_or_never() {
                error!(error = %e, "Change queue task failed");
                self.task_failures
                    .lock()
                    .push(ReplicationError::Internal(format!("background task failed: {}", e)));
            }
        }
        running.push(tokio::spawn(task));
        *tasks = running;
        true
    }

    /// Establish connections, position the consumer group and start
    /// delivery.
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let timeout = self.config.connection_timeout_duration();
        let attempt = async {
            let publish = self
                .client
                .get_connection_manager()
                .await
                .map_err(|e| ReplicationError::redis("CONNECT", e))?;

            let delivery = if self.config.write_only {
                None
            } else {
                let mut delivery = self
                    .client
                    .get_connection_manager()
                    .await
                    .map_err(|e| ReplicationError::redis("CONNECT", e))?;
                let resume_from = *self.resume_from.lock();
                self.consumer.ensure_group(&mut delivery, resume_from).await?;
                Some(delivery)
            };
            Ok::<_, ReplicationError>((publish, delivery))
        };

        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(ReplicationError::redis_msg(
                "CONNECT",
                format!("timed out after {:?}", timeout),
            )),
        };
        metrics::record_connection_attempt(result.is_ok());
        let (publish, delivery) = result?;

        {
            let mut conn = self.conn.write().await;
            if self.closed.load(Ordering::Acquire) {
                return Err(ReplicationError::QueueClosed);
            }
            *conn = Some(publish);
        }
        self.reconnecting.store(false, Ordering::Release);
        self.set_state(QueueState::Connected);

        let resume_from = *self.resume_from.lock();
        info!(
            node_id = %self.config.node_id,
            stream = %self.consumer.stream_key(),
            resume_from = %resume_from.map_or_else(|| "start".to_string(), |s| s.to_string()),
            write_only = self.config.write_only,
            "Established change queue connection"
        );

        if let Some(delivery) = delivery {
            self.start_delivery(delivery);
        }
        Ok(())
    }

    /// Start the delivery task on `conn`, replacing any previous one.
    fn start_delivery(self: &Arc<Self>, conn: ConnectionManager) {
        let mut slot = self.delivery.lock();
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(previous) = slot.take() {
            // Joined by close()
            previous.stop.send_replace(true);
            self.tasks.lock().push(previous.handle);
        }

        let span = info_span!(
            "delivery",
            node_id = %self.config.node_id,
            stream = %self.consumer.stream_key()
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::clone(self);
        let handle = tokio::spawn(inner.deliver(conn, stop_rx).instrument(span));
        *slot = Some(DeliveryTask {
            stop: stop_tx,
            handle,
        });
    }

    /// Stop the delivery task and wait for it to exit.
    async fn stop_delivery(&self) {
        let task = self.delivery.lock().take();
        let Some(task) = task else {
            return;
        };
        task.stop.send_replace(true);
        if let Err(e) = task.handle.await {
            error!(error = %e, "Delivery task failed");
            self.task_failures
                .lock()
                .push(ReplicationError::Internal(format!("background task failed: {}", e)));
        }
    }

    /// Drop the connection and start the reconnect task, once.
    fn connection_lost(self: &Arc<Self>, reason: &ReplicationError) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }

        error!(node_id = %self.config.node_id, error = %reason, "Change queue connection lost");
        metrics::record_connection_lost(if reason.is_connection_lost() {
            "connection"
        } else {
            "command"
        });
        self.set_state(QueueState::Reconnecting);

        let inner = Arc::clone(self);
        if !self.spawn_supervised(inner.reconnect()) {
            self.reconnecting.store(false, Ordering::Release);
        }
    }

    /// Retry `connect` on a fixed interval until it succeeds or the queue
    /// closes.
    async fn reconnect(self: Arc<Self>) {
        self.conn.write().await.take();
        // A publish-side failure leaves the old reader running.
        self.stop_delivery().await;

        let interval = self
            .config
            .reconnect_interval_duration()
            .max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut done = self.done_tx.subscribe();
        let mut attempt: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown_signal(&mut done) => {
                    debug!(node_id = %self.config.node_id, "Reconnect task stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            attempt += 1;
            let result = tokio::select! {
                _ = shutdown_signal(&mut done) => return,
                result = self.connect() => result,
            };
            match result {
                Ok(()) => {
                    info!(node_id = %self.config.node_id, attempt, "Reconnected to change queue");
                    return;
                }
                Err(ReplicationError::QueueClosed) => return,
                Err(e) => {
                    warn!(
                        node_id = %self.config.node_id,
                        attempt,
                        error = %e,
                        "Reconnect attempt failed"
                    );
                }
            }
        }
    }

    /// Read entries and hand decoded events to the forwarding task until
    /// shutdown, `stop`, or a transport error.
    async fn deliver(
        self: Arc<Self>,
        mut conn: ConnectionManager,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut done = self.done_tx.subscribe();
        let stream = self.consumer.stream_key().to_string();
        debug!("Delivery task started");

        loop {
            let next = tokio::select! {
                _ = shutdown_signal(&mut done) => break,
                _ = shutdown_signal(&mut stop) => break,
                next = self.consumer.next_entry(&mut conn) => next,
            };

            let entry = match next {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    self.connection_lost(&e);
                    break;
                }
            };

            let (sequence, operation) = match entry.decode() {
                Ok(decoded) => decoded,
                Err(e) => {
                    // Left pending: the ack-wait redelivers it.
                    warn!(entry_id = %entry.id, error = %e, "Dropping undecodable entry");
                    metrics::record_decode_failure(&stream);
                    continue;
                }
            };

            self.advance_resume_point(sequence);
            metrics::record_delivery(&stream, entry.redelivered);
            trace!(
                sequence = %sequence,
                method = %operation.method,
                redelivered = entry.redelivered,
                "Delivering event"
            );

            let event = self.event_for(operation, sequence);
            tokio::select! {
                _ = shutdown_signal(&mut done) => break,
                _ = shutdown_signal(&mut stop) => break,
                sent = self.input_tx.send(event) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }

        debug!("Delivery task stopped");
    }

    fn advance_resume_point(&self, sequence: Sequence) {
        let mut resume_from = self.resume_from.lock();
        *resume_from = Some(resume_from.map_or(sequence, |current| current.max(sequence)));
    }

    fn event_for(self: &Arc<Self>, operation: Operation, sequence: Sequence) -> Event {
        let inner = Arc::downgrade(self);
        Event::new(operation, sequence, move || {
            Box::pin(async move {
                let inner = inner.upgrade().ok_or(ReplicationError::QueueClosed)?;
                inner.ack(sequence).await
            })
        })
    }

    async fn ack(self: &Arc<Self>, sequence: Sequence) -> Result<()> {
        let mut conn = self.connection().await.ok_or(ReplicationError::NoConnection)?;
        let result = self.consumer.ack(&mut conn, sequence).await;
        metrics::record_ack(self.consumer.stream_key(), result.is_ok());
        if let Err(e) = &result {
            if e.is_connection_lost() {
                self.connection_lost(e);
            }
        }
        result
    }
}

/// Move events from the delivery side to the public stream.
async fn forward(
    mut input: mpsc::Receiver<Event>,
    output: mpsc::Sender<Event>,
    mut done: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown_signal(&mut done) => break,
            event = input.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        tokio::select! {
            _ = shutdown_signal(&mut done) => break,
            sent = output.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Forwarding task stopped");
}
