// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Redis testcontainer setup
//! - A hand-fed [`MockQueue`] that records acknowledgements
//! - Catalog record helpers

#![allow(dead_code)]

pub mod containers;
pub mod mock_queue;

pub use containers::*;
pub use mock_queue::*;

use catalog_replication::Catalog;

/// An active record.
pub fn catalog(id: &str, category: &str, name: &str) -> Catalog {
    Catalog {
        id: id.to_string(),
        active: true,
        category: category.to_string(),
        name: name.to_string(),
        ..Default::default()
    }
}

/// Names of the records, in the order given.
pub fn names(records: &[std::sync::Arc<Catalog>]) -> Vec<String> {
    records.iter().map(|r| r.name.clone()).collect()
}
