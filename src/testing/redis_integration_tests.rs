//! Scenarios against a live Redis server.
//!
//! Ignored by default. The server is taken from `FARMCACHE_REDIS_URL`
//! (default `redis://127.0.0.1:6379/15`). Every test writes under its own
//! random prefix, so the database is never flushed.

#[cfg(test)]
mod tests {
    use crate::cache::{Cache, ShardedCache, MAX_BATCH_KEYS};
    use crate::config::{CacheConfig, ClusterConfig, FarmConfig, PoolConfig};
    use crate::connection::{Connection, RedisConnection};
    use crate::farm::HashRingRouter;
    use crate::script::{Reply, ScriptCall, ScriptRegistry};
    use crate::types::{Record, MAX_TTL_SECS};
    use bytes::Bytes;
    use rand::Rng;
    use std::sync::Arc;

    fn redis_url() -> String {
        std::env::var("FARMCACHE_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string())
    }

    fn unique_prefix(name: &str) -> String {
        format!("{}-{:08x}", name, rand::rng().random::<u32>())
    }

    async fn connect(name: &str) -> ShardedCache {
        ShardedCache::connect(&redis_url(), "farmcache-test", &unique_prefix(name))
            .await
            .unwrap()
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_round_trip() {
        let cache = connect("round_trip").await;
        cache.put(Record::new("1", "1", 60)).await.unwrap();

        let record = cache.get("1").await.unwrap().unwrap();
        assert_eq!(record.key, "1");
        assert_eq!(record.value, "1");
        assert!(record.ttl > 0 && record.ttl <= 60);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_older_put_ignored() {
        let cache = connect("older_put").await;

        cache.clock().set_offset(-1900);
        cache.put(Record::new("1", "1", 60)).await.unwrap();
        cache.clock().set_offset(-2000);
        cache.put(Record::new("1", "100", 60)).await.unwrap();

        assert_eq!(cache.get("1").await.unwrap().unwrap().value, "1");
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_delete_scenarios() {
        let cache = connect("delete").await;
        for key in ["1", "2", "3"] {
            cache.put(Record::new(key, key, 60)).await.unwrap();
        }

        cache.clock().set_offset(-2000);
        cache.delete("2").await.unwrap();
        assert!(cache.get("2").await.unwrap().is_some());

        cache.clock().set_offset(0);
        cache.delete("2").await.unwrap();
        let records = cache.multi_get(&["1", "2", "3"]).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.key != "2"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_tombstone_resurrection() {
        let cache = connect("resurrect").await;
        cache.put(Record::new("k", "v1", 60)).await.unwrap();

        cache.clock().set_offset(100);
        cache.delete("k").await.unwrap();
        cache.clock().set_offset(50);
        cache.put(Record::new("k", "v2", 60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.clock().set_offset(200);
        cache.put(Record::new("k", "v3", 60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap().value, "v3");
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_batch_truncation() {
        let cache = connect("truncate").await;
        let keys: Vec<String> = (0..30).map(|i| i.to_string()).collect();
        for key in &keys {
            cache.put(Record::new(key.clone(), "v", 60)).await.unwrap();
        }
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();

        assert_eq!(cache.multi_get(&refs).await.unwrap().len(), MAX_BATCH_KEYS);

        cache.multi_delete(&refs).await.unwrap();
        assert_eq!(cache.get("24").await.unwrap(), None);
        assert!(cache.get("25").await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_ttl_field_not_persisted() {
        let url = redis_url();
        let conn = RedisConnection::open(&url, &PoolConfig::default()).unwrap();
        let scripts = ScriptRegistry::new();
        let key = format!("h:farmcache-test:{}:k", unique_prefix("raw"));

        conn.run(
            &scripts,
            &ScriptCall::Put {
                key: key.clone(),
                timestamp: 10,
                field: "k".into(),
                value: Bytes::from("v"),
                ttl_secs: 60,
            },
        )
        .await
        .unwrap();

        let reply = conn
            .run(&scripts, &ScriptCall::Get { key: key.clone() })
            .await
            .unwrap();
        match reply {
            Reply::Record(Some(fields)) => {
                assert!(fields.contains_key("_ttl_"));
                assert_eq!(fields["_tm_"], Bytes::from("10"));
            }
            other => panic!("unexpected reply: {:?}", other),
        }

        let client = redis::Client::open(url.as_str()).unwrap();
        let mut raw = client.get_multiplexed_async_connection().await.unwrap();
        let ttl_field: bool = redis::cmd("HEXISTS")
            .arg(&key)
            .arg("_ttl_")
            .query_async(&mut raw)
            .await
            .unwrap();
        assert!(!ttl_field);

        let prior = conn
            .run(
                &scripts,
                &ScriptCall::Put {
                    key,
                    timestamp: 10,
                    field: "k".into(),
                    value: Bytes::from("w"),
                    ttl_secs: 60,
                },
            )
            .await
            .unwrap();
        assert_eq!(prior, Reply::Prior(Some(10)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_oversized_ttl_writes_nothing() {
        let conn = RedisConnection::open(&redis_url(), &PoolConfig::default()).unwrap();
        let scripts = ScriptRegistry::new();
        let key = format!("h:farmcache-test:{}:k", unique_prefix("ttl"));

        let err = conn
            .run(
                &scripts,
                &ScriptCall::Put {
                    key: key.clone(),
                    timestamp: 10,
                    field: "k".into(),
                    value: Bytes::from("v"),
                    ttl_secs: MAX_TTL_SECS + 1,
                },
            )
            .await;
        assert!(err.is_err());

        let reply = conn.run(&scripts, &ScriptCall::Get { key }).await.unwrap();
        assert_eq!(reply, Reply::Record(None));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_from_config_with_hash_ring() {
        let farm_config = FarmConfig::new(vec![ClusterConfig::new(vec![redis_url(), redis_url()])]);
        let cache_config = CacheConfig::new("farmcache-test", unique_prefix("ring"));
        let (cache, report) =
            ShardedCache::from_config(&farm_config, cache_config, Arc::new(HashRingRouter::new()))
                .await
                .unwrap();

        assert!(report.is_success());
        assert_eq!(cache.farm().shard_count(), 2);

        cache.put(Record::new("k", "v", 60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().unwrap().value, "v");
        assert_eq!(cache.multi_get(&["k"]).await.unwrap().len(), 1);
    }
}
