//! Configuration types for the sharded cache.

use serde::Deserialize;
use std::time::Duration;

/// Default namespace segment of every physical key.
pub const DEFAULT_NAMESPACE: &str = "h";

/// Per-shard connection pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle connections kept for reuse.
    pub max_idle: usize,

    /// Maximum number of connections checked out at once.
    /// Callers wait for a free slot when the pool is exhausted.
    pub max_active: usize,

    /// Idle connections older than this are closed, in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 6,
            max_active: 6,
            idle_timeout_secs: 240,
        }
    }
}

impl PoolConfig {
    /// Idle timeout as a duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Effective number of active slots (at least one).
    pub fn active_slots(&self) -> usize {
        self.max_active.max(1)
    }
}

/// What to do when some shards cannot be reached while building a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPolicy {
    /// Fail the whole build if any shard is unreachable.
    FailFast,

    /// Build with the reachable shards and report the rest.
    #[default]
    Degrade,
}

/// Configuration for one cluster of shards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Shard addresses (`redis://host:port/db`).
    pub servers: Vec<String>,

    /// Pool sizing applied to every shard of the cluster.
    pub pool: PoolConfig,

    /// Policy for unreachable shards.
    pub build_policy: BuildPolicy,
}

impl ClusterConfig {
    /// Create a cluster config for the given servers.
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    /// Set maximum idle connections per shard.
    pub fn with_max_idle(mut self, n: usize) -> Self {
        self.pool.max_idle = n;
        self
    }

    /// Set maximum active connections per shard.
    pub fn with_max_active(mut self, n: usize) -> Self {
        self.pool.max_active = n;
        self
    }

    /// Set the idle connection timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool.idle_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the build policy.
    pub fn with_build_policy(mut self, policy: BuildPolicy) -> Self {
        self.build_policy = policy;
        self
    }
}

/// Configuration for a farm: an ordered list of clusters.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct FarmConfig {
    /// Clusters in routing order.
    pub clusters: Vec<ClusterConfig>,
}

impl FarmConfig {
    /// Create a farm config from clusters.
    pub fn new(clusters: Vec<ClusterConfig>) -> Self {
        Self { clusters }
    }

    /// Single cluster with a single shard.
    pub fn single(server: impl Into<String>) -> Self {
        Self::new(vec![ClusterConfig::new(vec![server.into()])])
    }
}

/// Keyspace and call settings of the cache façade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// First segment of every physical key.
    pub namespace: String,

    /// Application name (required).
    pub app: String,

    /// Key prefix inside the application.
    pub prefix: String,

    /// Optional second-level prefix.
    pub subprefix: Option<String>,

    /// Per-operation timeout in milliseconds. `None` waits indefinitely.
    pub op_timeout_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            app: String::new(),
            prefix: String::new(),
            subprefix: None,
            op_timeout_ms: None,
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with the given app and prefix.
    pub fn new(app: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Set the namespace segment.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the second-level prefix.
    pub fn with_subprefix(mut self, subprefix: impl Into<String>) -> Self {
        self.subprefix = Some(subprefix.into());
        self
    }

    /// Set the per-operation timeout.
    pub fn with_op_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Per-operation timeout as a duration.
    pub fn op_timeout(&self) -> Option<Duration> {
        self.op_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let pool = PoolConfig::default();
        assert_eq!(pool.max_idle, 6);
        assert_eq!(pool.max_active, 6);
        assert_eq!(pool.idle_timeout(), Duration::from_secs(240));

        let config = CacheConfig::default();
        assert_eq!(config.namespace, "h");
        assert!(config.app.is_empty());
        assert!(config.op_timeout().is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new("orders", "item")
            .with_subprefix("v2")
            .with_op_timeout(Duration::from_millis(250));

        assert_eq!(config.app, "orders");
        assert_eq!(config.prefix, "item");
        assert_eq!(config.subprefix.as_deref(), Some("v2"));
        assert_eq!(config.op_timeout(), Some(Duration::from_millis(250)));

        let cluster = ClusterConfig::new(vec!["redis://127.0.0.1:6379".into()])
            .with_max_idle(2)
            .with_max_active(0)
            .with_build_policy(BuildPolicy::FailFast);
        assert_eq!(cluster.pool.max_idle, 2);
        assert_eq!(cluster.pool.active_slots(), 1);
        assert_eq!(cluster.build_policy, BuildPolicy::FailFast);
    }

    #[test]
    fn test_farm_config_deserialize() {
        let json = r#"{
            "clusters": [
                { "servers": ["redis://a:6379", "redis://b:6379"],
                  "pool": { "max_active": 12 },
                  "build_policy": "fail_fast" }
            ]
        }"#;

        let config: FarmConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.clusters.len(), 1);

        let cluster = &config.clusters[0];
        assert_eq!(cluster.servers.len(), 2);
        assert_eq!(cluster.pool.max_active, 12);
        assert_eq!(cluster.pool.max_idle, 6);
        assert_eq!(cluster.build_policy, BuildPolicy::FailFast);
    }

    #[test]
    fn test_cache_config_deserialize_defaults() {
        let config: CacheConfig = serde_json::from_str(r#"{ "app": "test" }"#).unwrap();
        assert_eq!(config.app, "test");
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert!(config.subprefix.is_none());
    }
}
