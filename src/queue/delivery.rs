// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis Stream consumer-group plumbing for the change queue.
//!
//! Every node owns a consumer group named after its node ID, so every node
//! sees every operation. Entries are read one at a time:
//!
//! 1. `XAUTOCLAIM` reclaims this consumer's own entry that has stayed
//!    unacknowledged longer than the ack-wait (redelivery).
//! 2. Otherwise `XREADGROUP ... >` blocks for the next new entry.
//!
//! # Resumption
//!
//! On (re)connect the group's delivery position is moved with `XGROUP SETID`
//! to the resumption point, so delivery continues strictly after the last
//! sequence the node observed. Without a resumption point the position is
//! `0` and the full backlog is delivered.

use super::types::Sequence;
use crate::error::{ReplicationError, Result};
use crate::model::Operation;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

/// Stream entry field carrying the JSON-encoded operation.
pub const PAYLOAD_FIELD: &str = "payload";

/// A raw stream entry as returned by Redis.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub id: String,
    pub fields: HashMap<String, Value>,
    /// Reclaimed after the ack-wait rather than read fresh.
    pub redelivered: bool,
}

impl RawEntry {
    /// Decode the entry into its sequence and operation.
    pub fn decode(&self) -> Result<(Sequence, Operation)> {
        let sequence = Sequence::parse(&self.id)?;
        let payload = payload_bytes(&self.fields)?;
        let operation = Operation::from_json(payload)?;
        Ok((sequence, operation))
    }
}

fn payload_bytes(fields: &HashMap<String, Value>) -> Result<&[u8]> {
    let value = fields
        .get(PAYLOAD_FIELD)
        .ok_or_else(|| ReplicationError::Decode(format!("missing field: {}", PAYLOAD_FIELD)))?;

    match value {
        Value::BulkString(bytes) => Ok(bytes.as_slice()),
        Value::SimpleString(s) => Ok(s.as_bytes()),
        _ => Err(ReplicationError::Decode(format!(
            "unexpected type for field {}: {:?}",
            PAYLOAD_FIELD, value
        ))),
    }
}

/// Start of a full pending-list scan.
const SCAN_START: &str = "0-0";

/// Consumer of one subject's stream on behalf of one node.
#[derive(Debug)]
pub struct StreamConsumer {
    stream_key: String,
    /// Group and consumer name.
    node_id: String,
    ack_wait: Duration,
    block_timeout: Duration,
    /// Where the next `XAUTOCLAIM` scan resumes. Each call only inspects a
    /// bounded window of the pending list.
    claim_cursor: Mutex<String>,
}

impl StreamConsumer {
    pub fn new(
        stream_key: String,
        node_id: String,
        ack_wait: Duration,
        block_timeout: Duration,
    ) -> Self {
        Self {
            stream_key,
            node_id,
            ack_wait,
            block_timeout,
            claim_cursor: Mutex::new(SCAN_START.to_string()),
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Position the next pending-list scan starts from.
    pub fn claim_cursor(&self) -> String {
        self.claim_cursor.lock().clone()
    }

    /// Store the scan position Redis returned. `"0-0"` means the scan
    /// wrapped and starts over.
    fn advance_claim_cursor(&self, next_start: String) {
        *self.claim_cursor.lock() = next_start;
    }

    /// Create the consumer group if needed and position it.
    ///
    /// With `resume_from` the next delivery is the first entry after it;
    /// without, delivery starts from the beginning of the stream.
    pub async fn ensure_group(
        &self,
        conn: &mut ConnectionManager,
        resume_from: Option<Sequence>,
    ) -> Result<()> {
        let created: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.node_id)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(()) => {
                debug!(stream = %self.stream_key, group = %self.node_id, "Created consumer group")
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                trace!(
                    stream = %self.stream_key,
                    group = %self.node_id,
                    "Consumer group already exists"
                )
            }
            Err(e) => return Err(ReplicationError::redis("XGROUP CREATE", e)),
        }

        let position = resume_from.map_or_else(|| "0".to_string(), |seq| seq.to_string());
        let _: () = redis::cmd("XGROUP")
            .arg("SETID")
            .arg(&self.stream_key)
            .arg(&self.node_id)
            .arg(&position)
            .query_async(conn)
            .await
            .map_err(|e| ReplicationError::redis("XGROUP SETID", e))?;

        debug!(
            stream = %self.stream_key,
            group = %self.node_id,
            position = %position,
            "Positioned consumer group"
        );
        Ok(())
    }

    /// Next entry to deliver: a stale pending one first, else a new one.
    ///
    /// Returns `None` when the block timeout passes with nothing to deliver.
    pub async fn next_entry(&self, conn: &mut ConnectionManager) -> Result<Option<RawEntry>> {
        if let Some(entry) = self.claim_stale(conn).await? {
            return Ok(Some(entry));
        }
        self.read_new(conn).await
    }

    /// Reclaim one of this consumer's entries idle longer than the ack-wait.
    async fn claim_stale(&self, conn: &mut ConnectionManager) -> Result<Option<RawEntry>> {
        let start = self.claim_cursor();

        // XAUTOCLAIM key group consumer min-idle start COUNT 1
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream_key)
            .arg(&self.node_id)
            .arg(&self.node_id)
            .arg(self.ack_wait.as_millis() as u64)
            .arg(&start)
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| ReplicationError::redis("XAUTOCLAIM", e))?;

        let AutoclaimReply { next_start, mut entries } = parse_autoclaim_reply(reply)?;
        trace!(
            start = %start,
            next_start = %next_start,
            claimed = entries.len(),
            "Scanned pending entries"
        );
        self.advance_claim_cursor(next_start);
        Ok(entries.pop().map(|mut entry| {
            entry.redelivered = true;
            entry
        }))
    }

    /// Block for the next never-delivered entry.
    async fn read_new(&self, conn: &mut ConnectionManager) -> Result<Option<RawEntry>> {
        let opts = StreamReadOptions::default()
            .group(&self.node_id, &self.node_id)
            .block(self.block_timeout.as_millis() as usize)
            .count(1);

        // XREADGROUP GROUP g c COUNT 1 BLOCK ms STREAMS key >
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(|e| ReplicationError::redis("XREADGROUP", e))?;

        let entry = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .next()
            .map(|id| RawEntry {
                id: id.id,
                fields: id.map,
                redelivered: false,
            });
        Ok(entry)
    }

    /// Acknowledge an entry.
    pub async fn ack(&self, conn: &mut ConnectionManager, sequence: Sequence) -> Result<()> {
        let _: u64 = conn
            .xack(&self.stream_key, &self.node_id, &[sequence.to_string()])
            .await
            .map_err(|e| ReplicationError::redis("XACK", e))?;
        Ok(())
    }
}

/// Decoded `XAUTOCLAIM` reply.
#[derive(Debug)]
pub struct AutoclaimReply {
    /// Cursor for the next scan; `"0-0"` once the pending list is exhausted.
    pub next_start: String,
    pub entries: Vec<RawEntry>,
}

/// Parse an `XAUTOCLAIM` reply: `[next-start, [[id, [field, value, ...]], ...], deleted]`.
///
/// Entries deleted from the stream while pending come back as nil (Redis
/// 6.2) and are skipped.
pub fn parse_autoclaim_reply(reply: Value) -> Result<AutoclaimReply> {
    let malformed =
        |what: &str| ReplicationError::Decode(format!("malformed XAUTOCLAIM reply: {}", what));

    let Value::Array(parts) = reply else {
        return Err(malformed("not an array"));
    };
    let mut parts = parts.into_iter();
    let next_start = parts
        .next()
        .as_ref()
        .and_then(value_to_string)
        .ok_or_else(|| malformed("missing next start"))?;
    let entries = match parts.next() {
        Some(Value::Array(entries)) => entries,
        Some(Value::Nil) | None => {
            return Ok(AutoclaimReply {
                next_start,
                entries: Vec::new(),
            })
        }
        Some(_) => return Err(malformed("entries are not an array")),
    };

    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let pair = match entry {
            Value::Array(pair) => pair,
            Value::Nil => continue,
            _ => return Err(malformed("entry is not an array")),
        };
        let mut pair = pair.into_iter();
        let (Some(id), Some(fields)) = (pair.next(), pair.next()) else {
            return Err(malformed("entry is missing id or fields"));
        };
        let id = value_to_string(&id).ok_or_else(|| malformed("entry id is not a string"))?;
        let fields = match fields {
            Value::Array(flat) => flat_to_map(flat).ok_or_else(|| malformed("bad field list"))?,
            Value::Nil => HashMap::new(),
            _ => return Err(malformed("fields are not an array")),
        };
        parsed.push(RawEntry {
            id,
            fields,
            redelivered: false,
        });
    }
    Ok(AutoclaimReply {
        next_start,
        entries: parsed,
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

fn flat_to_map(flat: Vec<Value>) -> Option<HashMap<String, Value>> {
    if flat.len() % 2 != 0 {
        return None;
    }
    let mut map = HashMap::with_capacity(flat.len() / 2);
    let mut iter = flat.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        map.insert(value_to_string(&field)?, value);
    }
    Some(map)
}
