// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Write-through catalog service.
//!
//! Writes go to the authoritative store first, then the matching
//! [`Operation`] is published so every node's replicator converges. Reads
//! are answered from the local [`MemStore`] only.
//!
//! A publish failure is returned to the caller even though the store write
//! already succeeded; retrying the write republishes it.

use crate::error::{ReplicationError, Result};
use crate::memstore::MemStore;
use crate::model::{Catalog, Operation};
use crate::queue::EventQueue;
use crate::store::{CatalogDraft, CatalogWriter};
use std::sync::Arc;
use tracing::{debug, warn};

type Readiness = Arc<dyn Fn() -> bool + Send + Sync>;

/// Catalog operations exposed to the (external) HTTP layer.
pub struct CatalogService<W: CatalogWriter, Q: EventQueue> {
    writer: Arc<W>,
    queue: Arc<Q>,
    cache: Arc<MemStore>,
    readiness: Readiness,
}

impl<W: CatalogWriter, Q: EventQueue> CatalogService<W, Q> {
    /// `readiness` reports whether the cache can serve reads, usually
    /// `move || replicator.ready()`.
    pub fn new<R>(writer: Arc<W>, queue: Arc<Q>, cache: Arc<MemStore>, readiness: R) -> Self
    where
        R: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            writer,
            queue,
            cache,
            readiness: Arc::new(readiness),
        }
    }

    /// Store a new record and publish its upsert.
    pub async fn create(&self, draft: CatalogDraft) -> Result<Catalog> {
        let catalog = self.writer.insert(draft).await?;
        self.publish(Operation::upsert(catalog.clone())).await?;
        Ok(catalog)
    }

    /// Replace a record and publish its upsert.
    pub async fn update(&self, id: &str, draft: CatalogDraft) -> Result<Catalog> {
        let catalog = self
            .writer
            .replace(id, draft)
            .await?
            .ok_or_else(|| ReplicationError::NotFound(format!("catalog {}", id)))?;
        self.publish(Operation::upsert(catalog.clone())).await?;
        Ok(catalog)
    }

    /// Soft-delete a record and publish a delete carrying only its id.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.writer
            .deactivate(id)
            .await?
            .ok_or_else(|| ReplicationError::NotFound(format!("catalog {}", id)))?;
        self.publish(Operation::delete(id)).await
    }

    async fn publish(&self, operation: Operation) -> Result<()> {
        let method = operation.method;
        let record_id = operation.record_id().unwrap_or_default().to_string();
        match self.queue.publish(operation).await {
            Ok(sequence) => {
                debug!(
                    record_id = %record_id,
                    method = %method,
                    sequence = %sequence,
                    "Published change"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    record_id = %record_id,
                    method = %method,
                    error = %e,
                    "Failed to publish change"
                );
                Err(e)
            }
        }
    }

    pub fn get(&self, id: &str) -> Result<Arc<Catalog>> {
        self.cache
            .get(id)
            .ok_or_else(|| ReplicationError::NotFound(format!("catalog {}", id)))
    }

    /// Records of a category whose name contains `query`
    /// (case-insensitive), optionally sorted by name.
    pub fn list(&self, category: &str, query: &str, sorted: bool) -> Result<Vec<Arc<Catalog>>> {
        self.cache
            .query(category, query, sorted)
            .ok_or_else(|| ReplicationError::NotFound(format!("category {}", category)))
    }

    pub fn categories(&self) -> Vec<String> {
        self.cache.categories()
    }

    /// Whether the cache has been bootstrapped.
    pub fn ready(&self) -> bool {
        (self.readiness)()
    }
}
