//! Consistent hashing router with virtual nodes.
//!
//! Every shard index is placed on the ring `vnodes` times. A key belongs to
//! the first virtual node at or after its hash, wrapping around. Growing a
//! cluster from N to N+1 shards moves roughly 1/(N+1) of the keys.

use super::router::{hash_key, KeyRouter};
use crate::error::{Error, Result};
use crate::types::ShardIndex;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Number of virtual nodes per shard.
pub const DEFAULT_VNODES_PER_SHARD: usize = 160;

/// A hash ring over shard indices `0..shards`.
#[derive(Debug, Clone)]
pub struct HashRing {
    vnodes: BTreeMap<u64, ShardIndex>,
    shards: usize,
}

impl HashRing {
    /// Build a ring for `shards` shards with `vnodes_per_shard` points each.
    pub fn new(shards: usize, vnodes_per_shard: usize) -> Self {
        let mut vnodes = BTreeMap::new();
        for shard in 0..shards {
            for i in 0..vnodes_per_shard.max(1) {
                let vnode_key = format!("shard-{}:{}", shard, i);
                vnodes.insert(hash_key(vnode_key.as_bytes()), shard);
            }
        }
        Self { vnodes, shards }
    }

    /// Number of shards on the ring.
    pub fn shard_count(&self) -> usize {
        self.shards
    }

    /// The shard owning `key`, `None` on an empty ring.
    pub fn owner(&self, key: &[u8]) -> Option<ShardIndex> {
        let hash = hash_key(key);
        self.vnodes
            .range(hash..)
            .next()
            .or_else(|| self.vnodes.iter().next())
            .map(|(_, &shard)| shard)
    }

    /// Distribution of a synthetic key sample across shards.
    pub fn distribution(&self, sample_size: usize) -> HashMap<ShardIndex, usize> {
        let mut distribution = HashMap::new();
        for i in 0..sample_size {
            let key = format!("sample_key_{}", i);
            if let Some(owner) = self.owner(key.as_bytes()) {
                *distribution.entry(owner).or_insert(0) += 1;
            }
        }
        distribution
    }
}

/// Router backed by a [`HashRing`].
///
/// Rings are built lazily per shard count and kept, since a router is
/// normally shared by clusters of a fixed size.
#[derive(Debug)]
pub struct HashRingRouter {
    vnodes_per_shard: usize,
    rings: RwLock<HashMap<usize, Arc<HashRing>>>,
}

impl HashRingRouter {
    pub fn new() -> Self {
        Self::with_vnodes(DEFAULT_VNODES_PER_SHARD)
    }

    pub fn with_vnodes(vnodes_per_shard: usize) -> Self {
        Self {
            vnodes_per_shard: vnodes_per_shard.max(1),
            rings: RwLock::new(HashMap::new()),
        }
    }

    /// The ring for `shards` shards.
    pub fn ring(&self, shards: usize) -> Arc<HashRing> {
        if let Some(ring) = self.rings.read().get(&shards) {
            return ring.clone();
        }
        self.rings
            .write()
            .entry(shards)
            .or_insert_with(|| Arc::new(HashRing::new(shards, self.vnodes_per_shard)))
            .clone()
    }
}

impl Default for HashRingRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyRouter for HashRingRouter {
    fn select(&self, key: &str, shards: usize) -> Result<ShardIndex> {
        if shards == 0 {
            return Err(Error::ShardNotFound { index: 0, shards });
        }
        self.ring(shards)
            .owner(key.as_bytes())
            .ok_or(Error::ShardNotFound { index: 0, shards })
    }

    fn name(&self) -> &'static str {
        "hash_ring"
    }
}
