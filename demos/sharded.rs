//! Sharded example against Redis.
//!
//! Shard addresses come from `FARMCACHE_SHARDS`, comma separated
//! (default `redis://127.0.0.1:6379/0`). Unreachable shards are reported
//! and skipped.

use farmcache::{
    Cache, CacheConfig, ClusterConfig, FarmConfig, HashRingRouter, Record, ShardedCache,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    let shards: Vec<String> = env::var("FARMCACHE_SHARDS")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let farm_config = FarmConfig::new(vec![ClusterConfig::new(shards)
        .with_max_active(16)
        .with_idle_timeout(Duration::from_secs(120))]);
    let cache_config = CacheConfig::new("demo", "session").with_op_timeout(Duration::from_secs(2));

    let (cache, report) =
        ShardedCache::from_config(&farm_config, cache_config, Arc::new(HashRingRouter::new()))
            .await?;

    println!("Reachable shards: {:?}", report.reachable);
    for (addr, error) in &report.unreachable {
        println!("Unreachable shard {}: {}", addr, error);
    }

    let keys: Vec<String> = (0..40).map(|i| format!("s{}", i)).collect();
    for key in &keys {
        cache.put(Record::new(key.clone(), "payload", 300)).await?;
    }

    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let (records, failure) = cache.multi_get_partial(&refs).await?;
    println!(
        "Batch of {} keys returned {} records (batches are capped at {})",
        refs.len(),
        records.len(),
        farmcache::MAX_BATCH_KEYS
    );
    if let Some(failure) = failure {
        println!("Some shards failed: {}", failure);
    }

    cache.multi_delete(&refs).await?;
    println!("\n{}", cache.metrics().to_prometheus());

    Ok(())
}
