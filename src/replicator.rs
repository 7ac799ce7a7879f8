// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicator: keeps a node's [`MemStore`] consistent with the
//! authoritative store.
//!
//! # Lifecycle
//!
//! ```text
//!  Loading ──(bootstrap attempted)──→ Streaming ──(shutdown / stream closed)──→ Stopped
//! ```
//!
//! - **Loading**: one full scan of the authoritative store per configured
//!   domain, each record applied as an `upsert`.
//! - **Streaming**: each delivered event is applied with the same routine
//!   and acknowledged only when that succeeds. A failed event is left
//!   unacknowledged for redelivery and the loop moves on.
//! - **Stopped**: the shutdown signal fired (clean) or the event stream
//!   ended (error).
//!
//! Readiness flips to `true` once, right after the bootstrap attempt, even
//! if the bootstrap failed: the stream replays the full backlog for a fresh
//! consumer and converges the cache on its own.

use crate::error::{ReplicationError, Result};
use crate::memstore::MemStore;
use crate::metrics;
use crate::model::{Operation, OperationMethod, OperationType};
use crate::queue::{shutdown_signal, EventQueue, EventStream};
use crate::store::CatalogSource;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// State of the replicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicatorState {
    /// Bootstrapping from the authoritative store.
    Loading,
    /// Applying live events.
    Streaming,
    /// The replication loop has returned.
    Stopped,
}

impl fmt::Display for ReplicatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicatorState::Loading => write!(f, "Loading"),
            ReplicatorState::Streaming => write!(f, "Streaming"),
            ReplicatorState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Bootstraps and then continuously updates the cache.
pub struct Replicator<S: CatalogSource, Q: EventQueue> {
    source: Arc<S>,
    cache: Arc<MemStore>,
    queue: Arc<Q>,
    /// Set once, after the bootstrap attempt.
    ready: AtomicBool,
    operation_types: HashSet<OperationType>,
    state_tx: watch::Sender<ReplicatorState>,
}

impl<S: CatalogSource, Q: EventQueue> Replicator<S, Q> {
    pub fn new(
        source: Arc<S>,
        cache: Arc<MemStore>,
        queue: Arc<Q>,
        operation_types: impl IntoIterator<Item = OperationType>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ReplicatorState::Loading);
        metrics::set_ready(false);
        metrics::set_replicator_state(&ReplicatorState::Loading.to_string());
        Self {
            source,
            cache,
            queue,
            ready: AtomicBool::new(false),
            operation_types: operation_types.into_iter().collect(),
            state_tx,
        }
    }

    /// True once the bootstrap has been attempted.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ReplicatorState {
        *self.state_tx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ReplicatorState> {
        self.state_tx.subscribe()
    }

    /// The cache this replicator maintains.
    pub fn cache(&self) -> &Arc<MemStore> {
        &self.cache
    }

    fn set_state(&self, state: ReplicatorState) {
        self.state_tx.send_replace(state);
        metrics::set_replicator_state(&state.to_string());
    }

    /// Bootstrap, then apply live events until `shutdown` turns `true` or
    /// the event stream ends.
    ///
    /// Returns the stream's terminal error if there is one, otherwise the
    /// bootstrap error, otherwise `Ok(())`.
    pub async fn replicate(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let bootstrap_result = self.bootstrap().await;
        if let Err(e) = &bootstrap_result {
            error!(error = %e, "Bootstrap failed, continuing with live events");
        }

        self.ready.store(true, Ordering::Release);
        metrics::set_ready(true);
        self.set_state(ReplicatorState::Streaming);

        let stream_result = match self.queue.subscribe() {
            Ok(events) => {
                self.stream(events, shutdown)
                    .instrument(info_span!("replicate"))
                    .await
            }
            Err(e) => Err(e),
        };
        self.set_state(ReplicatorState::Stopped);

        match stream_result {
            Err(e) => {
                error!(error = %e, "Failed to handle replication events");
                Err(e)
            }
            Ok(()) => bootstrap_result,
        }
    }

    /// Load every configured domain from the authoritative store.
    ///
    /// Stops at the first record that fails to apply.
    async fn bootstrap(&self) -> Result<()> {
        if !self.operation_types.contains(&OperationType::catalogs()) {
            debug!("Catalogs domain not configured, skipping bootstrap");
            return Ok(());
        }

        let start = Instant::now();
        let records = self.source.scan_all(None).await?;
        let count = records.len();

        for record in records {
            self.apply(&Operation::upsert(record))?;
        }

        metrics::record_bootstrap(OperationType::CATALOGS, count, start.elapsed());
        metrics::set_cache_size(self.cache.len(), self.cache.category_count());
        info!(
            records = count,
            categories = self.cache.category_count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Bootstrap complete"
        );
        Ok(())
    }

    async fn stream(&self, events: EventStream, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Streaming replication events");
        loop {
            let event = tokio::select! {
                _ = shutdown_signal(&mut shutdown) => {
                    info!("Replication stopped by shutdown signal");
                    return Ok(());
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                return Err(ReplicationError::StreamClosed);
            };

            let sequence = event.sequence();
            if let Err(e) = self.apply(event.operation()) {
                // Not acked: the queue redelivers after the ack-wait.
                warn!(sequence = %sequence, error = %e, "Failed to apply event");
                metrics::record_event_failed(error_kind(&e));
                continue;
            }
            metrics::set_cache_size(self.cache.len(), self.cache.category_count());

            if let Err(e) = event.ack().await {
                warn!(sequence = %sequence, error = %e, "Failed to acknowledge event");
            }
        }
    }

    /// Apply one operation to the cache.
    ///
    /// Operations outside the configured domains, or without a record,
    /// are ignored.
    pub fn apply(&self, operation: &Operation) -> Result<()> {
        let method = operation.method.to_string();
        if !self.operation_types.contains(&operation.op_type) || !operation.op_type.is_catalogs() {
            metrics::record_event_applied(&method, "ignored");
            return Ok(());
        }
        let Some(catalog) = &operation.catalog else {
            metrics::record_event_applied(&method, "ignored");
            return Ok(());
        };

        match operation.method {
            OperationMethod::Upsert => {
                if catalog.id.is_empty() {
                    return Err(ReplicationError::InvalidOperation(
                        "upsert without record id".to_string(),
                    ));
                }
                self.cache.upsert(catalog.clone());
            }
            OperationMethod::Delete => {
                self.cache.remove(&catalog.id);
            }
        }

        metrics::record_event_applied(&method, "applied");
        Ok(())
    }
}

fn error_kind(error: &ReplicationError) -> &'static str {
    match error {
        ReplicationError::InvalidOperation(_) => "invalid_operation",
        ReplicationError::Decode(_) => "decode",
        _ => "other",
    }
}
