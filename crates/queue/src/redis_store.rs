//! Redis-backed queue store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, RedisResult};
use tracing::{debug, info};

use feedstash_core::config::RedisConfig;

use crate::error::StoreError;
use crate::store::{CounterOp, MemoryUsage, QueueStore};

const SCAN_COUNT: usize = 500;

/// Queue store on a Redis list plus one string key per counter.
pub struct RedisQueueStore {
    conn: MultiplexedConnection,
    queue_key: String,
    io_timeout: Duration,
}

impl RedisQueueStore {
    /// Connect and ping within the configured connect timeout.
    ///
    /// Any failure here is a startup error; callers should not retry silently.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url())
            .map_err(|e| StoreError::Unavailable(format!("invalid redis url {}: {e}", config.redacted_url())))?;

        let connect_ms = config.connect_timeout_ms;
        let conn = match tokio::time::timeout(
            Duration::from_millis(connect_ms),
            client.get_multiplexed_async_connection(),
        )
        .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(StoreError::Unavailable(format!(
                    "connect to {} failed: {e}",
                    config.redacted_url()
                )))
            }
            Err(_) => return Err(StoreError::Timeout { op: "CONNECT", ms: connect_ms }),
        };

        let store = Self {
            conn,
            queue_key: config.queue_name.clone(),
            io_timeout: Duration::from_millis(config.io_timeout_ms),
        };
        store.ping().await?;

        info!(
            url = %config.redacted_url(),
            queue = %store.queue_key,
            "Redis queue store connected"
        );
        Ok(store)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let reply: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        debug!(reply = %reply, "Redis ping");
        Ok(())
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout {
                op,
                ms: self.io_timeout.as_millis() as u64,
            }),
        }
    }
}

/// Pull `used_memory` and `used_memory_peak` out of an `INFO memory` reply.
pub fn parse_memory_info(info: &str) -> MemoryUsage {
    let mut usage = MemoryUsage::default();
    for line in info.lines() {
        let Some((key, value)) = line.trim().split_once(':') else {
            continue;
        };
        match key {
            "used_memory" => usage.used_bytes = value.trim().parse().unwrap_or(0),
            "used_memory_peak" => usage.peak_bytes = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }
    usage
}

/// Escape glob metacharacters so a key prefix matches literally in SCAN.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl QueueStore for RedisQueueStore {
    fn name(&self) -> &str {
        &self.queue_key
    }

    async fn push_front(&self, entry: String) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("LPUSH", conn.lpush(&self.queue_key, entry)).await
    }

    async fn push_front_many(&self, entries: Vec<String>) -> Result<u64, StoreError> {
        if entries.is_empty() {
            return self.len().await;
        }
        // A multi-value LPUSH is one atomic command.
        let mut conn = self.conn.clone();
        self.bounded("LPUSH", conn.lpush(&self.queue_key, entries)).await
    }

    async fn len(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("LLEN", conn.llen(&self.queue_key)).await
    }

    async fn range(&self, start: i64, stop: i64) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(
            "LRANGE",
            conn.lrange(&self.queue_key, start as isize, stop as isize),
        )
        .await
    }

    async fn trim(&self, start: i64, stop: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(
            "LTRIM",
            conn.ltrim(&self.queue_key, start as isize, stop as isize),
        )
        .await
    }

    async fn incr_counter(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("INCRBY", conn.incr(key, delta)).await
    }

    async fn get_counter(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = self.bounded("GET", conn.get(key)).await?;
        Ok(value.unwrap_or(0))
    }

    async fn set_counter(&self, key: &str, value: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded("SET", conn.set(key, value)).await
    }

    async fn apply_counters(&self, ops: &[CounterOp]) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        for op in ops {
            match op {
                CounterOp::Incr { key, delta } => {
                    pipe.incr(key, *delta).ignore();
                }
                CounterOp::Set { key, value } => {
                    pipe.set(key, *value).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        self.bounded("PIPELINE", pipe.query_async(&mut conn)).await
    }

    async fn counter_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let mut conn = self.conn.clone();
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT)
                        .query_async(&mut conn),
                )
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn memory_usage(&self) -> Result<MemoryUsage, StoreError> {
        let mut conn = self.conn.clone();
        let info: String = self
            .bounded("INFO", redis::cmd("INFO").arg("memory").query_async(&mut conn))
            .await?;
        Ok(parse_memory_info(&info))
    }
}
