//! # Catalog Replication
//!
//! Event-driven replication of catalog records into a read-optimized,
//! in-memory cache on every node, using Redis Streams as the durable change
//! log.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                          catalog-replication                          │
//! │                                                                       │
//! │  ┌────────────────┐  write   ┌──────────────────┐                     │
//! │  │ CatalogService │─────────►│ authoritative    │                     │
//! │  │ (write-through)│          │ store (external) │                     │
//! │  └────────────────┘          └──────────────────┘                     │
//! │     │ publish   ▲ reads               │ scan_all (bootstrap)          │
//! │     ▼           │                     ▼                               │
//! │  ┌────────────┐ │            ┌──────────────┐      ┌────────────────┐ │
//! │  │   Queue    │─┼───────────►│  Replicator  │─────►│    MemStore    │ │
//! │  │ (XADD /    │ │   events   │ (apply, ack) │      │ id map +       │ │
//! │  │ XREADGROUP)│ │            └──────────────┘      │ category index │ │
//! │  └────────────┘ └──────────────────────────────────┤                │ │
//! │                                                    └────────────────┘ │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! 1. A write lands in the authoritative store, then an
//!    [`Operation`](model::Operation) is published on the [`Queue`].
//! 2. Every node's [`Replicator`] bootstraps its [`MemStore`] from a full
//!    scan, reports ready, then applies delivered events and acknowledges
//!    each one after it is applied.
//! 3. Reads are served from the cache, never from the store.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use catalog_replication::{CatalogConfig, InMemoryCatalogStore, MemStore, Queue, Replicator};
//! use std::sync::Arc;
//! use tokio::sync::watch;
//!
//! #[tokio::main]
//! async fn main() -> catalog_replication::Result<()> {
//!     let config = CatalogConfig::from_env();
//!     config.validate()?;
//!
//!     let queue = Arc::new(Queue::new(config.queue.clone()).await?);
//!     let replicator = Replicator::new(
//!         Arc::new(InMemoryCatalogStore::new()),
//!         Arc::new(MemStore::new()),
//!         Arc::clone(&queue),
//!         config.replicator.operation_types.clone(),
//!     );
//!
//!     let (_shutdown_tx, shutdown_rx) = watch::channel(false);
//!     let result = replicator.replicate(shutdown_rx).await;
//!     queue.close().await?;
//!     result
//! }
//! ```

pub mod config;
pub mod error;
pub mod memstore;
pub mod metrics;
pub mod model;
pub mod queue;
pub mod replicator;
pub mod service;
pub mod store;

// Re-exports for convenience
pub use config::{CatalogConfig, QueueConfig, ReplicatorConfig};
pub use error::{ReplicationError, Result};
pub use memstore::MemStore;
pub use model::{Catalog, Operation, OperationMethod, OperationType};
pub use queue::{Event, EventQueue, EventStream, Queue, QueueState, Sequence};
pub use replicator::{Replicator, ReplicatorState};
pub use service::CatalogService;
pub use store::{CatalogDraft, CatalogSource, CatalogWriter, InMemoryCatalogStore};
