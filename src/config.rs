// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the change queue and the replicator.
//!
//! Configuration can be constructed programmatically, deserialized from
//! YAML/JSON, or read from the environment with
//! [`CatalogConfig::from_env()`].
//!
//! # Quick Start
//!
//! ```rust
//! use catalog_replication::config::{CatalogConfig, QueueConfig};
//!
//! let config = CatalogConfig {
//!     queue: QueueConfig::for_testing("node-1", "redis://127.0.0.1:6379"),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! CatalogConfig
//! ├── queue: QueueConfig            # Redis Streams change queue
//! │   ├── url                       # redis://host:port
//! │   ├── cluster_id / subject      # stream key = "{cluster_id}:{subject}"
//! │   ├── node_id                   # unique per running instance
//! │   ├── ack_wait                  # redelivery timeout for unacked events
//! │   ├── reconnect_interval        # fixed retry interval
//! │   ├── block_timeout             # XREADGROUP block
//! │   ├── connection_timeout        # per connection attempt
//! │   └── write_only                # publish only, no subscription
//! └── replicator: ReplicatorConfig
//!     └── operation_types           # domains applied to the cache
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! queue:
//!   url: "redis://queue.internal:6379"
//!   cluster_id: "catalogs-prod"
//!   subject: "catalogs"
//!   ack_wait: "30s"
//!   reconnect_interval: "1s"
//! replicator:
//!   operation_types: ["catalogs"]
//! ```

use crate::error::{ReplicationError, Result};
use crate::model::OperationType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything a node needs to run replication.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub replicator: ReplicatorConfig,
}

impl CatalogConfig {
    /// Build a config from environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `EVENT_QUEUE_URL` | `queue.url` |
    /// | `EVENT_QUEUE_CLUSTER_ID` | `queue.cluster_id` |
    /// | `EVENT_QUEUE_SUBJECT` | `queue.subject` |
    /// | `EVENT_QUEUE_NODE_ID` | `queue.node_id` |
    /// | `EVENT_QUEUE_ACK_WAIT` | `queue.ack_wait` |
    /// | `EVENT_QUEUE_RECONNECT_INTERVAL` | `queue.reconnect_interval` |
    /// | `REPLICATOR_OPERATION_TYPES` | `replicator.operation_types` (comma-separated) |
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("EVENT_QUEUE_URL") {
            config.queue.url = url;
        }
        if let Some(cluster_id) = lookup("EVENT_QUEUE_CLUSTER_ID") {
            config.queue.cluster_id = cluster_id;
        }
        if let Some(subject) = lookup("EVENT_QUEUE_SUBJECT") {
            config.queue.subject = subject;
        }
        if let Some(node_id) = lookup("EVENT_QUEUE_NODE_ID") {
            config.queue.node_id = node_id;
        }
        if let Some(ack_wait) = lookup("EVENT_QUEUE_ACK_WAIT") {
            config.queue.ack_wait = ack_wait;
        }
        if let Some(interval) = lookup("EVENT_QUEUE_RECONNECT_INTERVAL") {
            config.queue.reconnect_interval = interval;
        }
        if let Some(types) = lookup("REPLICATOR_OPERATION_TYPES") {
            config.replicator.operation_types = types
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(OperationType::from)
                .collect();
        }

        config
    }

    /// Check that the config can actually be used.
    pub fn validate(&self) -> Result<()> {
        self.queue.validate()?;
        self.replicator.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QueueConfig: Redis Streams change queue
// ═══════════════════════════════════════════════════════════════════════════════

/// Change queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Redis URL of the log service.
    #[serde(default = "default_url")]
    pub url: String,

    /// Cluster/group identifier. Namespaces the subject's stream key.
    #[serde(default = "default_cluster_id")]
    pub cluster_id: String,

    /// This instance's identifier. Names its consumer group, so it must be
    /// unique per running instance.
    #[serde(default = "generate_node_id")]
    pub node_id: String,

    /// Subject operations are published on.
    #[serde(default = "default_subject")]
    pub subject: String,

    /// How long a delivered event may stay unacknowledged before it is
    /// redelivered, as a duration string (e.g. "30s").
    #[serde(default = "default_ack_wait")]
    pub ack_wait: String,

    /// Fixed interval between reconnect attempts (e.g. "1s").
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: String,

    /// How long one read blocks waiting for new entries (e.g. "5s").
    #[serde(default = "default_block_timeout")]
    pub block_timeout: String,

    /// Upper bound for a single connection attempt (e.g. "5s").
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: String,

    /// Publish only; never subscribe.
    #[serde(default)]
    pub write_only: bool,
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cluster_id() -> String {
    "catalogs-cluster".to_string()
}

fn default_subject() -> String {
    "catalogs".to_string()
}

fn default_ack_wait() -> String {
    "30s".to_string()
}

fn default_reconnect_interval() -> String {
    "1s".to_string()
}

fn default_block_timeout() -> String {
    "5s".to_string()
}

fn default_connection_timeout() -> String {
    "5s".to_string()
}

/// Generate a node id unique to this process.
pub fn generate_node_id() -> String {
    format!("catalogs_{}", uuid::Uuid::new_v4().simple())
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            cluster_id: default_cluster_id(),
            node_id: generate_node_id(),
            subject: default_subject(),
            ack_wait: default_ack_wait(),
            reconnect_interval: default_reconnect_interval(),
            block_timeout: default_block_timeout(),
            connection_timeout: default_connection_timeout(),
            write_only: false,
        }
    }
}

impl QueueConfig {
    /// Create a queue config for testing with fast timeouts.
    pub fn for_testing(node_id: &str, url: &str) -> Self {
        Self {
            url: url.to_string(),
            node_id: node_id.to_string(),
            ack_wait: "2s".to_string(),
            reconnect_interval: "100ms".to_string(),
            block_timeout: "200ms".to_string(),
            connection_timeout: "500ms".to_string(),
            ..Default::default()
        }
    }

    /// Redis stream key the subject maps to.
    pub fn stream_key(&self) -> String {
        format!("{}:{}", self.cluster_id, self.subject)
    }

    /// Parse the ack_wait string to a Duration.
    pub fn ack_wait_duration(&self) -> Duration {
        parse_or(&self.ack_wait, Duration::from_secs(30))
    }

    /// Parse the reconnect_interval string to a Duration.
    pub fn reconnect_interval_duration(&self) -> Duration {
        parse_or(&self.reconnect_interval, Duration::from_secs(1))
    }

    /// Parse the block_timeout string to a Duration.
    pub fn block_timeout_duration(&self) -> Duration {
        parse_or(&self.block_timeout, Duration::from_secs(5))
    }

    /// Parse the connection_timeout string to a Duration.
    pub fn connection_timeout_duration(&self) -> Duration {
        parse_or(&self.connection_timeout, Duration::from_secs(5))
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ReplicationError::Config("queue url is empty".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(ReplicationError::Config("queue subject is empty".to_string()));
        }
        if self.node_id.trim().is_empty() {
            return Err(ReplicationError::Config("queue node_id is empty".to_string()));
        }
        Ok(())
    }
}

fn parse_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicatorConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Replicator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Change domains this node applies to its cache. Operations of other
    /// types are ignored.
    #[serde(default = "default_operation_types")]
    pub operation_types: Vec<OperationType>,
}

fn default_operation_types() -> Vec<OperationType> {
    vec![OperationType::catalogs()]
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            operation_types: default_operation_types(),
        }
    }
}

impl ReplicatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.operation_types.is_empty() {
            return Err(ReplicationError::Config(
                "replicator has no operation types".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
