// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicated data model.
//!
//! - [`Catalog`]: the replicated record, owned by the authoritative store.
//! - [`Operation`]: one change to a record, the unit carried by the queue.
//!
//! # Wire Format
//!
//! Operations are JSON, field-exact:
//!
//! ```text
//! { "type": "catalogs", "method": "upsert"|"delete", "catalog": {..}, "timestamp": RFC3339 }
//! ```
//!
//! `catalog` is omitted when absent. For `delete` only `catalog.id` is
//! populated, so every record field decodes with a default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A catalog record.
///
/// `id` is assigned by the authoritative store and never changes. The cache
/// does not enforce uniqueness; it trusts the store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub id: String,
    /// Soft-delete marker.
    pub active: bool,
    pub category: String,
    pub name: String,
    pub desc: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Catalog {
    /// A record carrying only its id, as published for deletes.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// The change domain an operation belongs to.
///
/// Only `"catalogs"` exists today; the type stays open so new domains can be
/// published before every consumer knows about them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationType(String);

impl OperationType {
    pub const CATALOGS: &'static str = "catalogs";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn catalogs() -> Self {
        Self::new(Self::CATALOGS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_catalogs(&self) -> bool {
        self.0 == Self::CATALOGS
    }
}

impl Default for OperationType {
    fn default() -> Self {
        Self::catalogs()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OperationType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// What an operation does to its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMethod {
    /// Create or replace the record.
    Upsert,
    /// Remove the record (soft delete upstream).
    Delete,
}

impl fmt::Display for OperationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upsert => write!(f, "upsert"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A single change propagated through the queue.
///
/// An operation without a `catalog` payload is a no-op for every consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub method: OperationMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<Catalog>,
    /// Assigned by the queue at publish time.
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
}

impl Operation {
    /// An `upsert` of the full record in the catalogs domain.
    pub fn upsert(catalog: Catalog) -> Self {
        Self {
            op_type: OperationType::catalogs(),
            method: OperationMethod::Upsert,
            catalog: Some(catalog),
            timestamp: DateTime::<Utc>::default(),
        }
    }

    /// A `delete` in the catalogs domain; only the id travels.
    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            op_type: OperationType::catalogs(),
            method: OperationMethod::Delete,
            catalog: Some(Catalog::with_id(id)),
            timestamp: DateTime::<Utc>::default(),
        }
    }

    /// Id of the affected record, if there is a payload.
    pub fn record_id(&self) -> Option<&str> {
        self.catalog.as_ref().map(|c| c.id.as_str())
    }

    /// Decode an operation from its JSON wire form.
    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(data).map_err(|e| crate::ReplicationError::Decode(e.to_string()))
    }

    /// Encode to the JSON wire form.
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(crate::ReplicationError::Encode)
    }
}
