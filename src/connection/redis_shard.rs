//! Pooled connection to a Redis shard.

use super::Connection;
use crate::config::PoolConfig;
use crate::error::{BackendError, Error, Result};
use crate::script::{pairs_to_fields, Reply, ScriptCall, ScriptRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

/// An idle connection waiting for reuse.
struct IdleConn {
    conn: MultiplexedConnection,
    since: Instant,
}

/// A connection to one Redis server with a bounded pool.
///
/// At most `max_active` calls hold a connection at once; further callers
/// wait for a slot. Up to `max_idle` connections are kept for reuse and
/// closed once idle longer than the idle timeout. A connection that hit an
/// I/O error is discarded instead of returned.
pub struct RedisConnection {
    addr: String,
    client: Client,
    idle: Mutex<Vec<IdleConn>>,
    permits: Semaphore,
    max_idle: usize,
    idle_timeout: Duration,
}

/// A connection checked out of the pool, returned on drop.
struct PooledConn<'a> {
    owner: &'a RedisConnection,
    conn: MultiplexedConnection,
    broken: bool,
    _permit: SemaphorePermit<'a>,
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if self.broken {
            return;
        }
        let mut idle = self.owner.idle.lock();
        if idle.len() < self.owner.max_idle {
            idle.push(IdleConn {
                conn: self.conn.clone(),
                since: Instant::now(),
            });
        }
    }
}

impl RedisConnection {
    /// Create a pooled connection to `url`.
    ///
    /// Only the URL is validated here; sockets are opened on first use.
    pub fn open(url: &str, pool: &PoolConfig) -> Result<Self> {
        let client = Client::open(url).map_err(|e| BackendError::ConnectionFailed {
            addr: url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            addr: url.to_string(),
            client,
            idle: Mutex::new(Vec::with_capacity(pool.max_idle)),
            permits: Semaphore::new(pool.active_slots()),
            max_idle: pool.max_idle,
            idle_timeout: pool.idle_timeout(),
        })
    }

    /// Number of idle connections held by the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Number of calls that could start right now without waiting.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Close the pool. Waiting and future calls fail with `PoolClosed`.
    pub fn close(&self) {
        self.permits.close();
        self.idle.lock().clear();
    }

    async fn checkout(&self) -> Result<PooledConn<'_>> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| BackendError::PoolClosed(self.addr.clone()))?;

        let reused = {
            let mut idle = self.idle.lock();
            let mut found = None;
            while let Some(candidate) = idle.pop() {
                if candidate.since.elapsed() <= self.idle_timeout {
                    found = Some(candidate.conn);
                    break;
                }
            }
            found
        };

        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(shard = %self.addr, "Dialing new connection");
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| BackendError::redis(&self.addr, e))?
            }
        };

        Ok(PooledConn {
            owner: self,
            conn,
            broken: false,
            _permit: permit,
        })
    }

    /// Convert a redis error, marking the connection broken on I/O failures.
    fn failed(&self, pooled: &mut PooledConn<'_>, err: RedisError) -> Error {
        if err.is_io_error() || err.is_connection_dropped() {
            pooled.broken = true;
            warn!(shard = %self.addr, error = %err, "Discarding broken connection");
        }
        BackendError::redis(&self.addr, err).into()
    }
}

#[async_trait]
impl Connection for RedisConnection {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn ping(&self) -> Result<()> {
        let mut pooled = self.checkout().await?;
        let result: std::result::Result<String, RedisError> =
            redis::cmd("PING").query_async(&mut pooled.conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.failed(&mut pooled, e)),
        }
    }

    async fn run(&self, scripts: &ScriptRegistry, call: &ScriptCall) -> Result<Reply> {
        let mut pooled = self.checkout().await?;
        let mut invocation = scripts.script(call.procedure()).prepare_invoke();

        let result = match call {
            ScriptCall::Put {
                key,
                timestamp,
                field,
                value,
                ttl_secs,
            } => {
                invocation
                    .key(key.as_str())
                    .arg(*timestamp)
                    .arg(field.as_str())
                    .arg(&value[..])
                    .arg(*ttl_secs);
                let prior: std::result::Result<Option<i64>, RedisError> =
                    invocation.invoke_async(&mut pooled.conn).await;
                prior.map(Reply::Prior)
            }
            ScriptCall::Get { key } => {
                invocation.key(key.as_str());
                let flat: std::result::Result<Vec<Vec<u8>>, RedisError> =
                    invocation.invoke_async(&mut pooled.conn).await;
                flat.map(single_record)
            }
            ScriptCall::Delete { key, timestamp } => {
                invocation.key(key.as_str()).arg(*timestamp);
                let flat: std::result::Result<Vec<Vec<u8>>, RedisError> =
                    invocation.invoke_async(&mut pooled.conn).await;
                flat.map(single_record)
            }
            ScriptCall::MultiGet { keys } => {
                for key in keys {
                    invocation.key(key.as_str());
                }
                let nested: std::result::Result<Vec<Vec<Vec<u8>>>, RedisError> =
                    invocation.invoke_async(&mut pooled.conn).await;
                nested.map(many_records)
            }
            ScriptCall::MultiDelete { timestamp, keys } => {
                invocation.arg(*timestamp);
                for key in keys {
                    invocation.key(key.as_str());
                }
                let nested: std::result::Result<Vec<Vec<Vec<u8>>>, RedisError> =
                    invocation.invoke_async(&mut pooled.conn).await;
                nested.map(many_records)
            }
        };

        result.map_err(|e| {
            let procedure = call.procedure();
            warn!(
                shard = %self.addr,
                ?procedure,
                sha = scripts.sha(procedure),
                error = %e,
                "Script failed"
            );
            self.failed(&mut pooled, e)
        })
    }

    async fn flush(&self) -> Result<()> {
        let mut pooled = self.checkout().await?;
        let result: std::result::Result<(), RedisError> =
            redis::cmd("FLUSHDB").query_async(&mut pooled.conn).await;
        result.map_err(|e| self.failed(&mut pooled, e))
    }
}

fn single_record(flat: Vec<Vec<u8>>) -> Reply {
    if flat.is_empty() {
        Reply::Record(None)
    } else {
        Reply::Record(Some(pairs_to_fields(flat)))
    }
}

fn many_records(nested: Vec<Vec<Vec<u8>>>) -> Reply {
    Reply::Records(
        nested
            .into_iter()
            .filter(|flat| !flat.is_empty())
            .map(pairs_to_fields)
            .collect(),
    )
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("addr", &self.addr)
            .field("idle", &self.idle_count())
            .field("available_slots", &self.available_slots())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_rejects_bad_url() {
        let err = RedisConnection::open("not a url", &PoolConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::Backend(BackendError::ConnectionFailed { .. })
        ));
    }

    #[test]
    fn test_open_sizes_pool() {
        let pool = PoolConfig {
            max_idle: 2,
            max_active: 4,
            idle_timeout_secs: 30,
        };
        let conn = RedisConnection::open("redis://127.0.0.1:6379", &pool).unwrap();

        assert_eq!(conn.addr(), "redis://127.0.0.1:6379");
        assert_eq!(conn.available_slots(), 4);
        assert_eq!(conn.idle_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_pool_fails_fast() {
        let conn = RedisConnection::open("redis://127.0.0.1:6379", &PoolConfig::default()).unwrap();
        conn.close();

        let err = conn.ping().await.unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::PoolClosed(_))));
    }

    #[test]
    fn test_reply_shapes() {
        assert_eq!(single_record(Vec::new()), Reply::Record(None));

        let flat = vec![b"k".to_vec(), b"v".to_vec()];
        match single_record(flat) {
            Reply::Record(Some(fields)) => assert_eq!(fields.len(), 1),
            other => panic!("unexpected reply: {:?}", other),
        }

        let nested = vec![vec![b"a".to_vec(), b"1".to_vec()], Vec::new()];
        assert_eq!(many_records(nested).into_records().len(), 1);
    }
}
