// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up Redis containers for integration tests.

use catalog_replication::QueueConfig;
use redis::AsyncCommands;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis server shared by every node of one test cluster.
pub struct TestCluster<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub redis_url: String,
}

impl<'a> TestCluster<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let redis_url = redis_url(&container);
        Self {
            container,
            redis_url,
        }
    }

    /// Fast-timing queue config for one node of this cluster.
    pub fn node_config(&self, node_id: &str) -> QueueConfig {
        QueueConfig::for_testing(node_id, &self.redis_url)
    }

    /// Append a raw entry, bypassing the queue's encoder.
    pub async fn add_raw_entry(
        &self,
        stream_key: &str,
        fields: &[(&str, &str)],
    ) -> redis::RedisResult<String> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        conn.xadd(stream_key, "*", fields).await
    }

    /// Get stream length.
    pub async fn stream_len(&self, stream_key: &str) -> redis::RedisResult<usize> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        conn.xlen(stream_key).await
    }

    /// Disconnect every client except the caller (`CLIENT KILL TYPE normal`).
    pub async fn kill_clients(&self) -> redis::RedisResult<u64> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let killed: u64 = redis::cmd("CLIENT")
            .arg("KILL")
            .arg("TYPE")
            .arg("normal")
            .query_async(&mut conn)
            .await?;
        Ok(killed)
    }

    /// Connections whose last command was a consumer-group read.
    pub async fn stream_readers(&self) -> redis::RedisResult<usize> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let list: String = redis::cmd("CLIENT").arg("LIST").query_async(&mut conn).await?;
        Ok(list
            .lines()
            .filter(|line| {
                line.split(' ')
                    .any(|field| field == "cmd=xreadgroup" || field == "cmd=xautoclaim")
            })
            .count())
    }

    /// Number of entries delivered to `group` but not yet acknowledged.
    pub async fn pending_count(&self, stream_key: &str, group: &str) -> redis::RedisResult<usize> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let reply: redis::streams::StreamPendingReply = conn.xpending(stream_key, group).await?;
        Ok(reply.count())
    }
}
