//! Testing utilities for the sharded cache.
//!
//! - [`faults`]: a connection wrapper that fails or stalls on demand.
//! - Helpers building farms and caches over in-process shards, so tests
//!   run without a Redis server.
//!
//! Scenario tests live next to these helpers. Tests against a real Redis
//! server are ignored by default; run them with
//! `FARMCACHE_REDIS_URL=redis://127.0.0.1:6379/15 cargo test -- --ignored`.

pub mod faults;

mod redis_integration_tests;

pub use faults::{FaultMode, FaultyConnection};

use crate::cache::{CacheBuilder, ShardedCache};
use crate::connection::{MemoryShard, SharedConnection};
use crate::error::Result;
use crate::farm::{Cluster, Farm, ModuloRouter};
use std::sync::Arc;

/// A farm of one cluster over `shards` in-process shards.
///
/// Keys are spread with [`ModuloRouter`]. The shards are returned so tests
/// can inspect them.
pub async fn memory_farm(shards: usize) -> Result<(Farm, Vec<Arc<MemoryShard>>)> {
    let mems: Vec<Arc<MemoryShard>> = (0..shards)
        .map(|i| Arc::new(MemoryShard::new(format!("mem-{}", i))))
        .collect();

    let conns = mems.iter().map(|m| m.clone() as SharedConnection).collect();
    let farm = farm_of(conns).await?;
    Ok((farm, mems))
}

/// A farm of one cluster over the given connections.
pub async fn farm_of(conns: Vec<SharedConnection>) -> Result<Farm> {
    let mut builder = Cluster::builder().with_router(ModuloRouter);
    for conn in conns {
        builder = builder.with_connection(conn);
    }
    let (cluster, _) = builder.build().await?;
    Farm::builder().with_cluster(cluster).build()
}

/// A cache over `shards` in-process shards.
pub async fn memory_cache(app: &str, prefix: &str, shards: usize) -> Result<ShardedCache> {
    let (farm, _) = memory_farm(shards).await?;
    CacheBuilder::new()
        .with_farm(farm)
        .with_app(app)
        .with_prefix(prefix)
        .build()
}
