//! A cluster: an ordered set of shard connections and a router.

use super::router::{FirstShardRouter, KeyRouter};
use crate::config::{BuildPolicy, ClusterConfig, PoolConfig};
use crate::connection::{RedisConnection, SharedConnection};
use crate::error::{Error, Result};
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of probing the shards of a topology while building it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Addresses of the shards that answered.
    pub reachable: Vec<String>,
    /// Addresses of the shards that did not, with the error seen.
    pub unreachable: Vec<(String, String)>,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when every shard answered.
    pub fn is_success(&self) -> bool {
        self.unreachable.is_empty()
    }

    pub fn reachable_count(&self) -> usize {
        self.reachable.len()
    }

    pub fn unreachable_count(&self) -> usize {
        self.unreachable.len()
    }

    /// Record a shard that answered.
    pub fn record_success(&mut self, addr: impl Into<String>) {
        self.reachable.push(addr.into());
    }

    /// Record a shard that did not answer.
    pub fn record_failure(&mut self, addr: impl Into<String>, error: impl Into<String>) {
        self.unreachable.push((addr.into(), error.into()));
    }

    /// Merge another report into this one.
    pub fn merge(&mut self, other: BuildReport) {
        self.reachable.extend(other.reachable);
        self.unreachable.extend(other.unreachable);
    }
}

/// An ordered list of connections with a key router.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct Cluster {
    conns: Vec<SharedConnection>,
    router: Arc<dyn KeyRouter>,
}

impl Cluster {
    /// Start building a cluster.
    pub fn builder() -> ClusterBuilder {
        ClusterBuilder::new()
    }

    /// The connection that owns `key`.
    pub fn select(&self, key: &str) -> Result<&SharedConnection> {
        let shards = self.conns.len();
        let index = self.router.select(key, shards)?;
        self.conns
            .get(index)
            .ok_or(Error::ShardNotFound { index, shards })
    }

    /// All connections, in order.
    pub fn connections(&self) -> &[SharedConnection] {
        &self.conns
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn router_name(&self) -> &'static str {
        self.router.name()
    }
}

/// Builder for [`Cluster`].
#[derive(Debug)]
pub struct ClusterBuilder {
    servers: Vec<String>,
    pool: PoolConfig,
    router: Arc<dyn KeyRouter>,
    conns: Vec<SharedConnection>,
    build_policy: BuildPolicy,
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self {
            servers: Vec::new(),
            pool: PoolConfig::default(),
            router: Arc::new(FirstShardRouter),
            conns: Vec::new(),
            build_policy: BuildPolicy::default(),
        }
    }

    /// Builder preloaded from a cluster config.
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new()
            .with_servers(config.servers.clone())
            .with_pool(config.pool.clone())
            .with_build_policy(config.build_policy)
    }

    /// Redis shard addresses, in order.
    pub fn with_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_max_idle(mut self, n: usize) -> Self {
        self.pool.max_idle = n;
        self
    }

    pub fn with_max_active(mut self, n: usize) -> Self {
        self.pool.max_active = n;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool.idle_timeout_secs = timeout.as_secs();
        self
    }

    /// Set the key router. Defaults to [`FirstShardRouter`].
    pub fn with_router(mut self, router: impl KeyRouter + 'static) -> Self {
        self.router = Arc::new(router);
        self
    }

    /// Share a router with other clusters.
    pub fn with_shared_router(mut self, router: Arc<dyn KeyRouter>) -> Self {
        self.router = router;
        self
    }

    /// Add a ready-made connection, placed after the Redis servers.
    pub fn with_connection(mut self, conn: SharedConnection) -> Self {
        self.conns.push(conn);
        self
    }

    pub fn with_build_policy(mut self, policy: BuildPolicy) -> Self {
        self.build_policy = policy;
        self
    }

    /// Open and ping every shard, then assemble the cluster.
    ///
    /// Shards that fail the ping are listed in the report. Under
    /// [`BuildPolicy::FailFast`] any such shard fails the build; under
    /// [`BuildPolicy::Degrade`] the cluster keeps only the reachable ones.
    /// A cluster without any reachable shard is never built.
    pub async fn build(self) -> Result<(Cluster, BuildReport)> {
        if self.servers.is_empty() && self.conns.is_empty() {
            return Err(Error::Config("cluster has no shard addresses".to_string()));
        }

        let mut report = BuildReport::new();
        let mut candidates: Vec<SharedConnection> = Vec::with_capacity(self.servers.len());

        for server in &self.servers {
            match RedisConnection::open(server, &self.pool) {
                Ok(conn) => candidates.push(Arc::new(conn)),
                Err(e) => report.record_failure(server.clone(), e.to_string()),
            }
        }
        candidates.extend(self.conns);

        let pings = join_all(candidates.iter().map(|c| c.ping())).await;
        let mut reachable = Vec::with_capacity(candidates.len());
        for (conn, ping) in candidates.into_iter().zip(pings) {
            match ping {
                Ok(()) => {
                    debug!(shard = %conn.addr(), "Shard reachable");
                    report.record_success(conn.addr());
                    reachable.push(conn);
                }
                Err(e) => report.record_failure(conn.addr(), e.to_string()),
            }
        }

        for (addr, error) in &report.unreachable {
            warn!(shard = %addr, error = %error, "Shard unreachable");
        }

        if !report.is_success() && self.build_policy == BuildPolicy::FailFast {
            let addrs: Vec<&str> = report.unreachable.iter().map(|(a, _)| a.as_str()).collect();
            return Err(Error::Config(format!(
                "{} of {} shards unreachable: {}",
                report.unreachable_count(),
                report.unreachable_count() + report.reachable_count(),
                addrs.join(", ")
            )));
        }

        if reachable.is_empty() {
            return Err(Error::Config("cluster has no reachable shards".to_string()));
        }

        info!(
            shards = reachable.len(),
            unreachable = report.unreachable_count(),
            router = self.router.name(),
            "Cluster built"
        );

        Ok((
            Cluster {
                conns: reachable,
                router: self.router,
            },
            report,
        ))
    }
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
