// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Authoritative store integration traits.
//!
//! The durable database that owns catalog records lives outside this crate.
//! Two seams describe what replication needs from it:
//!
//! - [`CatalogSource`]: full-table reads for the replicator's bootstrap.
//! - [`CatalogWriter`]: writes performed by [`crate::service::CatalogService`]
//!   before it publishes the matching operation.
//!
//! [`InMemoryCatalogStore`] implements both and stands in for the database in
//! tests and single-process setups.
//!
//! # Example
//!
//! ```rust,no_run
//! use catalog_replication::store::{BoxFuture, CatalogSource};
//! use catalog_replication::model::Catalog;
//!
//! struct Postgres { /* ... */ }
//!
//! impl CatalogSource for Postgres {
//!     fn scan_all(&self, _category: Option<&str>) -> BoxFuture<'_, Vec<Catalog>> {
//!         Box::pin(async move { Ok(vec![]) })
//!     }
//! }
//! ```

use crate::error::{ReplicationError, Result};
use crate::model::Catalog;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Read side of the authoritative store.
pub trait CatalogSource: Send + Sync + 'static {
    /// Every record, including inactive ones, optionally restricted to a
    /// category.
    fn scan_all(&self, category: Option<&str>) -> BoxFuture<'_, Vec<Catalog>>;
}

/// Write side of the authoritative store.
pub trait CatalogWriter: Send + Sync + 'static {
    /// Persist a new record. The store assigns the id and timestamps.
    fn insert(&self, draft: CatalogDraft) -> BoxFuture<'_, Catalog>;

    /// Replace the mutable fields of an existing record.
    ///
    /// Returns `None` when no record has this id.
    fn replace(&self, id: &str, draft: CatalogDraft) -> BoxFuture<'_, Option<Catalog>>;

    /// Soft-delete: mark the record inactive.
    ///
    /// Returns `None` when no record has this id.
    fn deactivate(&self, id: &str) -> BoxFuture<'_, Option<Catalog>>;
}

/// Caller-supplied fields of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogDraft {
    pub active: bool,
    pub category: String,
    pub name: String,
    pub desc: String,
    pub value: String,
}

impl CatalogDraft {
    /// An active record with empty description and value.
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            active: true,
            category: category.into(),
            name: name.into(),
            desc: String::new(),
            value: String::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    fn validate(&self) -> Result<()> {
        if self.category.trim().is_empty() {
            return Err(ReplicationError::Store("category is required".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(ReplicationError::Store("name is required".to_string()));
        }
        Ok(())
    }
}

/// Process-local authoritative store.
///
/// Records are kept in id order so `scan_all` is deterministic.
#[derive(Debug, Default)]
pub struct InMemoryCatalogStore {
    records: RwLock<BTreeMap<String, Catalog>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-built records as-is (ids and timestamps included).
    pub fn with_records(records: impl IntoIterator<Item = Catalog>) -> Self {
        let store = Self::new();
        {
            let mut map = store.records.write();
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CatalogSource for InMemoryCatalogStore {
    fn scan_all(&self, category: Option<&str>) -> BoxFuture<'_, Vec<Catalog>> {
        let records: Vec<Catalog> = self
            .records
            .read()
            .values()
            .filter(|c| category.map_or(true, |wanted| c.category == wanted))
            .cloned()
            .collect();
        Box::pin(async move { Ok(records) })
    }
}

impl CatalogWriter for InMemoryCatalogStore {
    fn insert(&self, draft: CatalogDraft) -> BoxFuture<'_, Catalog> {
        Box::pin(async move {
            draft.validate()?;
            let now = Utc::now();
            let catalog = Catalog {
                id: uuid::Uuid::new_v4().simple().to_string(),
                active: draft.active,
                category: draft.category,
                name: draft.name,
                desc: draft.desc,
                value: draft.value,
                created_at: now,
                updated_at: now,
            };
            self.records.write().insert(catalog.id.clone(), catalog.clone());
            Ok(catalog)
        })
    }

    fn replace(&self, id: &str, draft: CatalogDraft) -> BoxFuture<'_, Option<Catalog>> {
        let id = id.to_string();
        Box::pin(async move {
            draft.validate()?;
            let mut records = self.records.write();
            let Some(existing) = records.get_mut(&id) else {
                return Ok(None);
            };
            existing.active = draft.active;
            existing.category = draft.category;
            existing.name = draft.name;
            existing.desc = draft.desc;
            existing.value = draft.value;
            existing.updated_at = Utc::now();
            Ok(Some(existing.clone()))
        })
    }

    fn deactivate(&self, id: &str) -> BoxFuture<'_, Option<Catalog>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut records = self.records.write();
            let Some(existing) = records.get_mut(&id) else {
                return Ok(None);
            };
            existing.active = false;
            existing.updated_at = Utc::now();
            Ok(Some(existing.clone()))
        })
    }
}
