// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for catalog replication.
//!
//! Errors are categorized by their source (Redis, the authoritative store,
//! payload decoding, etc.) and carry enough context to be logged directly.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `NoConnection` | Yes | No Redis connection currently held (reconnect in progress) |
//! | `Redis` | Yes | Network errors, timeouts, command failures |
//! | `Store` | Yes | Authoritative store temporarily unavailable |
//! | `QueueClosed` | No | The queue was closed |
//! | `Encode` | No | Operation could not be serialized |
//! | `Decode` | No | Malformed stream entry or Operation payload |
//! | `Config` | No | Configuration invalid |
//! | `InvalidOperation` | No | Operation cannot be applied to the cache |
//! | `NotFound` | No | Record or category unknown |
//! | `StreamClosed` | No | Event stream ended (queue shut down upstream) |
//! | `Close` | No | One or more failures while closing the queue |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Connection errors are never retried inline: recovery is the background
//! reconnect task's job. [`ReplicationError::is_retryable()`] tells a caller
//! (e.g. a publisher) whether repeating the same call later can succeed.

use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur while replicating catalog records.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// No transport connection is currently held.
    ///
    /// Returned synchronously by `publish` while the queue is disconnected.
    /// The caller decides whether to retry; nothing is queued.
    #[error("no connection to the event queue")]
    NoConnection,

    /// The queue has been closed.
    #[error("queue already closed")]
    QueueClosed,

    /// Redis connection or command error.
    #[error("Redis error ({operation}): {message}")]
    Redis {
        operation: String,
        message: String,
        #[source]
        source: Option<redis::RedisError>,
    },

    /// Operation could not be serialized for publishing.
    #[error("failed to encode operation: {0}")]
    Encode(#[source] serde_json::Error),

    /// Inbound stream entry could not be decoded into an Operation.
    #[error("failed to decode operation: {0}")]
    Decode(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure reported by the authoritative store.
    #[error("store error: {0}")]
    Store(String),

    /// Operation is well-formed on the wire but cannot be applied.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Requested record or category does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The event stream ended because the queue was shut down.
    #[error("event channel is closed")]
    StreamClosed,

    /// Closing the queue failed; every underlying failure is kept.
    #[error("unable to close queue: {}", join_messages(.errors))]
    Close { errors: Vec<ReplicationError> },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ReplicationError {
    /// Create a Redis error from a redis::RedisError
    pub fn redis(operation: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a Redis error without source
    pub fn redis_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Redis {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NoConnection => true,
            Self::Redis { .. } => true,
            Self::Store(_) => true,
            Self::QueueClosed => false,
            Self::Encode(_) => false,
            Self::Decode(_) => false,
            Self::Config(_) => false,
            Self::InvalidOperation(_) => false,
            Self::NotFound(_) => false,
            Self::StreamClosed => false,
            Self::Close { .. } => false,
            Self::Internal(_) => false,
        }
    }

    /// Whether the underlying transport connection is gone.
    ///
    /// Used to turn a failed command into a connection-lost notification.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::NoConnection => true,
            Self::Redis {
                source: Some(source),
                ..
            } => source.is_io_error() || source.is_connection_dropped() || source.is_timeout(),
            _ => false,
        }
    }
}

impl From<redis::RedisError> for ReplicationError {
    fn from(e: redis::RedisError) -> Self {
        Self::redis("unknown", e)
    }
}

fn join_messages(errors: &[ReplicationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
