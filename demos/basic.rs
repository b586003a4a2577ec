//! Basic example: a cache over in-process shards, with racing writers.

use farmcache::testing::memory_farm;
use farmcache::{Cache, CacheBuilder, Record};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("farmcache=debug,info")
        .init();

    let (farm, shards) = memory_farm(3).await?;
    let cache = CacheBuilder::new()
        .with_farm(farm)
        .with_app("demo")
        .with_prefix("user")
        .build()?;

    println!("Cache ready over {} in-process shards", shards.len());

    println!("\n--- Put / Get ---");
    for (key, value) in [("1", "alice"), ("2", "bob"), ("3", "carol")] {
        cache.put(Record::new(key, value, 3600)).await?;
    }
    if let Some(record) = cache.get("1").await? {
        println!(
            "Got {} = {:?} (ttl {}s)",
            record.key,
            String::from_utf8_lossy(&record.value),
            record.ttl
        );
    }

    println!("\n--- A lagging writer loses ---");
    cache.clock().set_offset(-2000);
    let ack = cache.put(Record::new("1", "stale", 3600)).await?;
    println!("Prior timestamp reported by the shard: {:?}", ack.prior_timestamp);
    cache.delete("2").await?;
    cache.clock().set_offset(0);

    let record = cache.get("1").await?;
    println!("Key 1 still holds {:?}", record.map(|r| r.value));
    println!("Key 2 still present: {}", cache.get("2").await?.is_some());

    println!("\n--- Delete and batch read ---");
    cache.delete("2").await?;
    let records = cache.multi_get(&["1", "2", "3"]).await?;
    let mut keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
    keys.sort();
    println!("Live keys: {:?}", keys);

    for shard in &shards {
        println!("  {:?}", shard);
    }

    let snap = cache.metrics().snapshot();
    println!("\nCache stats:");
    println!("  Puts: {}", snap.put_total);
    println!("  Gets: {} (hit rate {:.0}%)", snap.get_total, snap.hit_rate() * 100.0);
    println!("  Batch reads: {}", snap.multi_get_total);

    cache.shutdown();
    Ok(())
}
