//! Sharded key-value cache with logical-timestamp conflict resolution.
//!
//! Writers may race: retries, duplicate deliveries and clock-skewed
//! producers all hit the same keys. Every record carries the logical time of
//! its last accepted write, and each shard compares timestamps atomically,
//! so the cache converges on the most recent logical write instead of the
//! most recently arrived one.
//!
//! - **Put** lands only when its timestamp is strictly newer.
//! - **Delete** lands when its timestamp is not older, and leaves a
//!   tombstone that hides the record until a strictly newer put.
//! - **Batch** calls (`multi_get`, `multi_delete`) fan out to every shard and
//!   merge the answers.
//!
//! # Example
//!
//! ```rust,no_run
//! use farmcache::{Cache, Record, ShardedCache};
//!
//! #[tokio::main]
//! async fn main() -> farmcache::Result<()> {
//!     let cache = ShardedCache::connect("redis://127.0.0.1:6379/0", "orders", "user").await?;
//!
//!     cache.put(Record::new("42", "alice", 3600)).await?;
//!     if let Some(record) = cache.get("42").await? {
//!         println!("{} = {:?} (ttl {}s)", record.key, record.value, record.ttl);
//!     }
//!
//!     cache.delete("42").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               ShardedCache                  │
//! │  • keyspace  h:<app>:<prefix>:<key>         │
//! │  • logical clock (wall time + offset)       │
//! └─────────────────────────────────────────────┘
//!          │ get_conn(key)          │ all_conn()
//!          ▼                        ▼
//! ┌─────────────────────────────────────────────┐
//! │   Farm → Cluster → KeyRouter → Connection   │
//! │              FanOut (join_all)              │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌──────────────────────┐ ┌────────────────────┐
//! │ RedisConnection      │ │ MemoryShard        │
//! │ Lua procedures       │ │ native procedures  │
//! └──────────────────────┘ └────────────────────┘
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod farm;
pub mod metrics;
pub mod script;
pub mod testing;
pub mod types;

pub use cache::{Cache, CacheBuilder, Keyspace, LogicalClock, ShardedCache, MAX_BATCH_KEYS};
pub use config::{BuildPolicy, CacheConfig, ClusterConfig, FarmConfig, PoolConfig};
pub use error::{BackendError, Error, FanOutError, Result, ShardFailure};
pub use types::{PutAck, Record, Timestamp, MAX_TTL_SECS};

pub use connection::{Connection, FanOut, FanOutReply, MemoryShard, RedisConnection, SharedConnection};
pub use farm::{
    BuildReport, Cluster, ClusterBuilder, Farm, FarmBuilder, FirstShardRouter, HashRingRouter,
    KeyRouter, ModuloRouter,
};

pub use metrics::{CacheMetrics, Counter, Histogram, HistogramSnapshot, LabeledCounter, MetricsSnapshot};
pub use script::{Procedure, Reply, ScriptCall, ScriptRegistry};
