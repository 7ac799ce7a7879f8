// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory catalog cache.
//!
//! A read-mostly view of the authoritative store, filled exclusively by
//! replaying [`Operation`](crate::model::Operation)s. It never originates a
//! change.
//!
//! # Structure
//!
//! ```text
//! MemStore
//! └── RwLock<Inner>
//!     ├── records:    id       → Arc<Catalog>
//!     └── categories: category → {id, ..}
//! ```
//!
//! One lock guards both maps, so readers always observe them consistent:
//! every id present under some category is also present in `records`.
//!
//! # Category Changes
//!
//! When an upsert moves a record to another category the id is removed from
//! the previous category's set. A category whose set becomes empty is
//! dropped, so [`MemStore::categories()`] only lists categories that
//! currently hold records.

use crate::model::Catalog;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    records: HashMap<String, Arc<Catalog>>,
    categories: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn unindex(&mut self, category: &str, id: &str) {
        if let Some(ids) = self.categories.get_mut(category) {
            ids.remove(id);
            if ids.is_empty() {
                self.categories.remove(category);
            }
        }
    }
}

/// Concurrent id- and category-indexed catalog cache.
#[derive(Default)]
pub struct MemStore {
    inner: RwLock<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record by id and index it under its category.
    ///
    /// Re-applying an identical record leaves the cache unchanged.
    pub fn upsert(&self, catalog: Catalog) {
        let catalog = Arc::new(catalog);
        let mut inner = self.inner.write();

        if let Some(previous) = inner.records.get(&catalog.id).cloned() {
            if previous.category != catalog.category {
                inner.unindex(&previous.category, &previous.id);
            }
        }

        let ids = inner.categories.entry(catalog.category.clone()).or_default();
        if !ids.contains(&catalog.id) {
            ids.insert(catalog.id.clone());
        }

        inner.records.insert(catalog.id.clone(), catalog);
    }

    /// Point lookup by id.
    pub fn get(&self, id: &str) -> Option<Arc<Catalog>> {
        self.inner.read().records.get(id).cloned()
    }

    /// Fetch every known id from `ids`, skipping unknown ones.
    ///
    /// With `sorted` the result is ordered by `name` ascending; otherwise the
    /// order is unspecified.
    pub fn get_many<I, S>(&self, ids: I, sorted: bool) -> Vec<Arc<Catalog>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inner = self.inner.read();
        let mut out: Vec<Arc<Catalog>> = ids
            .into_iter()
            .filter_map(|id| inner.records.get(id.as_ref()).cloned())
            .collect();
        drop(inner);

        if sorted {
            sort_by_name(&mut out);
        }
        out
    }

    /// All categories currently holding at least one record (unordered).
    pub fn categories(&self) -> Vec<String> {
        self.inner.read().categories.keys().cloned().collect()
    }

    /// Ids indexed under `category`, or `None` if the category is unknown.
    pub fn category_ids(&self, category: &str) -> Option<Vec<String>> {
        self.inner
            .read()
            .categories
            .get(category)
            .map(|ids| ids.iter().cloned().collect())
    }

    /// Records of `category` whose name contains `substring` (case-insensitive).
    ///
    /// An empty `substring` matches everything. Returns `None` only when the
    /// category itself is unknown; a known category with no matching record
    /// yields `Some(vec![])`.
    pub fn query(
        &self,
        category: &str,
        substring: &str,
        sorted: bool,
    ) -> Option<Vec<Arc<Catalog>>> {
        let mut records: Vec<Arc<Catalog>> = {
            let inner = self.inner.read();
            let ids = inner.categories.get(category)?;
            ids.iter()
                .filter_map(|id| inner.records.get(id).cloned())
                .collect()
        };

        if !substring.is_empty() {
            let needle = substring.to_lowercase();
            records.retain(|record| record.name.to_lowercase().contains(&needle));
        }

        if sorted {
            sort_by_name(&mut records);
        }
        Some(records)
    }

    /// Remove a record and its category index entry.
    ///
    /// The index entry is found through the record's last known category.
    /// Unknown ids are ignored.
    pub fn remove(&self, id: &str) -> Option<Arc<Catalog>> {
        let mut inner = self.inner.write();
        let removed = inner.records.remove(id)?;
        inner.unindex(&removed.category, id);
        Some(removed)
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of indexed categories.
    pub fn category_count(&self) -> usize {
        self.inner.read().categories.len()
    }
}

fn sort_by_name(records: &mut [Arc<Catalog>]) {
    records.sort_by(|a, b| a.name.cmp(&b.name));
}
