//! The cache façade.
//!
//! [`ShardedCache`] turns logical keys into physical keys, stamps writes with
//! its [`LogicalClock`], routes each call through the [`Farm`] and decodes
//! the shard replies into [`Record`]s.
//!
//! Single-key calls go to the shard owning the key. Batch calls go to every
//! shard; each shard answers for the keys it holds and the answers are
//! merged.
//!
//! ```rust,ignore
//! let cache = ShardedCache::connect("redis://127.0.0.1:6379/0", "orders", "user").await?;
//! cache.put(Record::new("42", "alice", 60)).await?;
//! let record = cache.get("42").await?;
//! ```

mod clock;
mod keyspace;

pub use clock::LogicalClock;
pub use keyspace::Keyspace;

use crate::config::{CacheConfig, FarmConfig};
use crate::connection::FanOutReply;
use crate::error::{Error, FanOutError, Result};
use crate::farm::{BuildReport, Farm, FirstShardRouter, KeyRouter};
use crate::metrics::CacheMetrics;
use crate::script::{Reply, ScriptCall, ScriptRegistry};
use crate::types::{is_reserved_field, PutAck, Record, MAX_TTL_SECS};
use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Maximum number of keys handled by one batch call.
///
/// Longer batches are cut to their first `MAX_BATCH_KEYS` keys.
pub const MAX_BATCH_KEYS: usize = 25;

/// Operations offered by a cache.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Store a record stamped with the current logical time.
    ///
    /// A stored record with an equal or newer timestamp wins and the call
    /// is a no-op; that is not an error.
    async fn put(&self, record: Record) -> Result<PutAck>;

    /// Read a record. `None` when absent, expired or deleted.
    async fn get(&self, key: &str) -> Result<Option<Record>>;

    /// Delete a record unless it was written after the current logical time.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read the live records among `keys`, in no particular order.
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Record>>;

    /// Delete every record among `keys`, under the rule of [`Cache::delete`].
    async fn multi_delete(&self, keys: &[&str]) -> Result<()>;
}

/// A cache spread over the shards of a [`Farm`].
#[derive(Debug)]
pub struct ShardedCache {
    farm: Farm,
    keyspace: Keyspace,
    clock: LogicalClock,
    scripts: ScriptRegistry,
    metrics: Arc<CacheMetrics>,
    op_timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl ShardedCache {
    pub fn builder() -> CacheBuilder {
        CacheBuilder::new()
    }

    /// Connect to a single Redis server with default pool sizing.
    pub async fn connect(server: &str, app: &str, prefix: &str) -> Result<Self> {
        if server.trim().is_empty() {
            return Err(Error::Config("no cache server address".to_string()));
        }
        let (farm, _) =
            Farm::from_config(&FarmConfig::single(server), Arc::new(FirstShardRouter)).await?;
        CacheBuilder::new()
            .with_farm(farm)
            .with_config(CacheConfig::new(app, prefix))
            .build()
    }

    /// Build the farm described by `farm_config` and a cache on top of it.
    pub async fn from_config(
        farm_config: &FarmConfig,
        cache_config: CacheConfig,
        router: Arc<dyn KeyRouter>,
    ) -> Result<(Self, BuildReport)> {
        let (farm, report) = Farm::from_config(farm_config, router).await?;
        let cache = CacheBuilder::new()
            .with_farm(farm)
            .with_config(cache_config)
            .build()?;
        Ok((cache, report))
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn farm(&self) -> &Farm {
        &self.farm
    }

    pub fn metrics(&self) -> Arc<CacheMetrics> {
        self.metrics.clone()
    }

    /// Token cancelled by [`ShardedCache::shutdown`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel in-flight calls and refuse new ones.
    pub fn shutdown(&self) {
        info!(keyspace = %self.keyspace.head(), "Shutting down cache");
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Remove every record from every shard, whatever its keyspace.
    pub async fn flush(&self) -> Result<()> {
        let conn = self.farm.all_conn();
        self.guarded(conn.flush()).await?
    }

    /// Like [`Cache::multi_get`], but keeps the records of the shards that
    /// answered when others failed.
    ///
    /// Fails only when every shard failed.
    pub async fn multi_get_partial(
        &self,
        keys: &[&str],
    ) -> Result<(Vec<Record>, Option<FanOutError>)> {
        let start = Instant::now();
        let result = match self.multi_get_inner(keys).await {
            Ok(reply) => match reply.failure {
                Some(failure) if failure.is_total() => Err(failure.into_error()),
                failure => Ok((decode_records(reply.replies), failure)),
            },
            Err(e) => Err(e),
        };
        match &result {
            Ok((records, _)) => self.metrics.record_multi_get(records.len(), start.elapsed()),
            Err(e) => self.metrics.record_error("multi_get", e),
        }
        result
    }

    /// Run `fut` under the operation timeout and the cancellation token.
    async fn guarded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let call = async {
            match self.op_timeout {
                Some(limit) => tokio::time::timeout(limit, fut)
                    .await
                    .map_err(|_| Error::Timeout),
                None => Ok(fut.await),
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = call => result,
        }
    }

    /// Run a single-key procedure on the shards owning `physical`.
    async fn run_single(&self, physical: &str, call: ScriptCall) -> Result<Vec<Reply>> {
        let conn = self.farm.get_conn(physical)?;
        let reply = self.guarded(conn.run(&self.scripts, &call)).await?;
        reply.into_result()
    }

    /// Physical keys of a batch, cut to [`MAX_BATCH_KEYS`].
    fn batch_keys(&self, op: &str, keys: &[&str]) -> Result<Vec<String>> {
        let keys = if keys.len() > MAX_BATCH_KEYS {
            debug!(
                op,
                requested = keys.len(),
                limit = MAX_BATCH_KEYS,
                "Truncating batch"
            );
            self.metrics.record_truncation();
            &keys[..MAX_BATCH_KEYS]
        } else {
            keys
        };
        keys.iter()
            .map(|key| {
                validate_key(key)?;
                Ok(self.keyspace.physical(key))
            })
            .collect()
    }

    async fn multi_get_inner(&self, keys: &[&str]) -> Result<FanOutReply> {
        let keys = self.batch_keys("multi_get", keys)?;
        if keys.is_empty() {
            return Ok(FanOutReply {
                replies: Vec::new(),
                failure: None,
            });
        }
        let conn = self.farm.all_conn();
        let call = ScriptCall::MultiGet { keys };
        let reply = self.guarded(conn.run(&self.scripts, &call)).await?;
        if reply.failure.as_ref().is_some_and(|f| !f.is_total()) {
            self.metrics.record_partial_fanout();
        }
        Ok(reply)
    }

    async fn put_inner(&self, record: Record) -> Result<PutAck> {
        validate_key(&record.key)?;
        if record.ttl > MAX_TTL_SECS {
            return Err(Error::InvalidTtl(record.ttl));
        }
        let physical = self.keyspace.physical(&record.key);
        let timestamp = self.clock.now();
        let call = ScriptCall::Put {
            key: physical.clone(),
            timestamp,
            field: record.key,
            value: record.value,
            ttl_secs: record.ttl,
        };
        let replies = self.run_single(&physical, call).await?;
        let prior_timestamp = replies.iter().filter_map(Reply::prior).max();
        debug!(key = %physical, timestamp, prior = ?prior_timestamp, "Put");
        Ok(PutAck { prior_timestamp })
    }

    async fn get_inner(&self, key: &str) -> Result<Option<Record>> {
        validate_key(key)?;
        let physical = self.keyspace.physical(key);
        let call = ScriptCall::Get {
            key: physical.clone(),
        };
        let replies = self.run_single(&physical, call).await?;
        Ok(decode_records(replies).into_iter().next())
    }

    async fn delete_inner(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let physical = self.keyspace.physical(key);
        let timestamp = self.clock.now();
        let call = ScriptCall::Delete {
            key: physical.clone(),
            timestamp,
        };
        let replies = self.run_single(&physical, call).await?;
        debug!(key = %physical, timestamp, applied = !replies.is_empty(), "Delete");
        Ok(())
    }

    async fn multi_delete_inner(&self, keys: &[&str]) -> Result<()> {
        let keys = self.batch_keys("multi_delete", keys)?;
        if keys.is_empty() {
            return Ok(());
        }
        let conn = self.farm.all_conn();
        let timestamp = self.clock.now();
        let call = ScriptCall::MultiDelete { timestamp, keys };
        let reply = self.guarded(conn.run(&self.scripts, &call)).await?;
        if reply.failure.as_ref().is_some_and(|f| !f.is_total()) {
            self.metrics.record_partial_fanout();
        }
        let deleted = reply.records().len();
        reply.into_result()?;
        debug!(timestamp, deleted, "Multi delete");
        Ok(())
    }
}

#[async_trait]
impl Cache for ShardedCache {
    async fn put(&self, record: Record) -> Result<PutAck> {
        let start = Instant::now();
        let result = self.put_inner(record).await;
        self.metrics.record_put(result.is_ok(), start.elapsed());
        if let Err(e) = &result {
            self.metrics.record_error("put", e);
        }
        result
    }

    async fn get(&self, key: &str) -> Result<Option<Record>> {
        let start = Instant::now();
        let result = self.get_inner(key).await;
        match &result {
            Ok(record) => self.metrics.record_get(record.is_some(), start.elapsed()),
            Err(e) => self.metrics.record_error("get", e),
        }
        result
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.delete_inner(key).await;
        match &result {
            Ok(()) => self.metrics.record_delete(start.elapsed()),
            Err(e) => self.metrics.record_error("delete", e),
        }
        result
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Record>> {
        let start = Instant::now();
        let result = match self.multi_get_inner(keys).await {
            Ok(reply) => reply.into_result().map(decode_records),
            Err(e) => Err(e),
        };
        match &result {
            Ok(records) => self.metrics.record_multi_get(records.len(), start.elapsed()),
            Err(e) => self.metrics.record_error("multi_get", e),
        }
        result
    }

    async fn multi_delete(&self, keys: &[&str]) -> Result<()> {
        let start = Instant::now();
        let result = self.multi_delete_inner(keys).await;
        match &result {
            Ok(()) => self.metrics.record_multi_delete(start.elapsed()),
            Err(e) => self.metrics.record_error("multi_delete", e),
        }
        result
    }
}

/// Decode shard replies into records, first occurrence of each key wins.
fn decode_records(replies: Vec<Reply>) -> Vec<Record> {
    let mut seen = HashSet::new();
    replies
        .into_iter()
        .flat_map(Reply::into_records)
        .filter_map(|fields| Record::from_fields(&fields))
        .filter(|record| seen.insert(record.key.clone()))
        .collect()
}

fn validate_key(key: &str) -> Result<()> {
    if is_reserved_field(key) {
        return Err(Error::InvalidKey(format!("{} is a reserved field name", key)));
    }
    Ok(())
}

/// Builder for [`ShardedCache`].
#[derive(Debug, Default)]
pub struct CacheBuilder {
    farm: Option<Farm>,
    config: CacheConfig,
    clock_offset: i64,
    metrics: Option<Arc<CacheMetrics>>,
    cancel: Option<CancellationToken>,
}

impl CacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_farm(mut self, farm: Farm) -> Self {
        self.farm = Some(farm);
        self
    }

    /// Replace the keyspace and timeout settings at once.
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_app(mut self, app: impl Into<String>) -> Self {
        self.config.app = app.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    pub fn with_subprefix(mut self, subprefix: impl Into<String>) -> Self {
        self.config.subprefix = Some(subprefix.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_op_timeout(timeout);
        self
    }

    /// Start the logical clock shifted by `offset` seconds.
    pub fn with_clock_offset(mut self, offset: i64) -> Self {
        self.clock_offset = offset;
        self
    }

    /// Share a metrics registry between caches.
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Tie the cache to an outer cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<ShardedCache> {
        let farm = self
            .farm
            .ok_or_else(|| Error::Config("cache requires a farm".to_string()))?;
        let keyspace = Keyspace::from_config(&self.config)?;

        info!(
            keyspace = %keyspace.head(),
            shards = farm.shard_count(),
            op_timeout_ms = ?self.config.op_timeout_ms,
            "Cache ready"
        );

        Ok(ShardedCache {
            farm,
            keyspace,
            clock: LogicalClock::with_offset(self.clock_offset),
            scripts: ScriptRegistry::new(),
            metrics: self.metrics.unwrap_or_default(),
            op_timeout: self.config.op_timeout(),
            cancel: self.cancel.unwrap_or_default(),
        })
    }
}
