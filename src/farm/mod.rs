//! Shard topology: farms of clusters of connections.
//!
//! A [`Farm`] is an ordered list of [`Cluster`]s. Single-key operations go to
//! one connection per cluster (normally one cluster, hence one connection);
//! batch operations go to every connection of every cluster.

mod cluster;
mod hashring;
mod router;

pub use cluster::{BuildReport, Cluster, ClusterBuilder};
pub use hashring::{HashRing, HashRingRouter, DEFAULT_VNODES_PER_SHARD};
pub use router::{FirstShardRouter, KeyRouter, ModuloRouter};

use crate::config::FarmConfig;
use crate::connection::FanOut;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// An ordered list of clusters.
#[derive(Debug, Clone)]
pub struct Farm {
    clusters: Vec<Cluster>,
}

impl Farm {
    pub fn builder() -> FarmBuilder {
        FarmBuilder::new()
    }

    /// Build a farm from configuration.
    ///
    /// Every cluster shares `router`. The reports of all clusters are merged.
    pub async fn from_config(
        config: &FarmConfig,
        router: Arc<dyn KeyRouter>,
    ) -> Result<(Farm, BuildReport)> {
        let mut builder = FarmBuilder::new();
        let mut report = BuildReport::new();

        for cluster_config in &config.clusters {
            let (cluster, cluster_report) = ClusterBuilder::from_config(cluster_config)
                .with_shared_router(router.clone())
                .build()
                .await?;
            report.merge(cluster_report);
            builder = builder.with_cluster(cluster);
        }

        Ok((builder.build()?, report))
    }

    /// The connections owning `key`, one per cluster.
    ///
    /// A cluster whose router fails is skipped with a warning. Fails only if
    /// no cluster yields a connection.
    pub fn get_conn(&self, key: &str) -> Result<FanOut> {
        let mut conns = Vec::with_capacity(self.clusters.len());
        let mut last_err = None;

        for (i, cluster) in self.clusters.iter().enumerate() {
            match cluster.select(key) {
                Ok(conn) => conns.push(conn.clone()),
                Err(e) => {
                    warn!(cluster = i, key = %key, error = %e, "Shard selection failed");
                    last_err = Some(e);
                }
            }
        }

        if conns.is_empty() {
            return Err(last_err
                .unwrap_or_else(|| Error::Internal("farm has no clusters".to_string())));
        }
        Ok(FanOut::new(conns))
    }

    /// Every connection of every cluster.
    pub fn all_conn(&self) -> FanOut {
        FanOut::new(
            self.clusters
                .iter()
                .flat_map(|c| c.connections().iter().cloned())
                .collect(),
        )
    }

    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Total number of connections.
    pub fn shard_count(&self) -> usize {
        self.clusters.iter().map(Cluster::len).sum()
    }
}

/// Builder for [`Farm`].
#[derive(Debug, Default)]
pub struct FarmBuilder {
    clusters: Vec<Cluster>,
}

impl FarmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a built cluster.
    pub fn with_cluster(mut self, cluster: Cluster) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn build(self) -> Result<Farm> {
        if self.clusters.is_empty() {
            return Err(Error::Config("farm has no clusters".to_string()));
        }
        let farm = Farm {
            clusters: self.clusters,
        };
        info!(
            clusters = farm.clusters.len(),
            shards = farm.shard_count(),
            "Farm built"
        );
        Ok(farm)
    }
}
