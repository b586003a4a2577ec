//! Shard selection strategies.
//!
//! A [`KeyRouter`] maps a physical record key to the index of one connection
//! inside a cluster. The router must be deterministic: every caller has to
//! agree on where a key lives.

use crate::error::{Error, Result};
use crate::types::ShardIndex;
use std::fmt;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Maps a record key to a connection index inside a cluster.
pub trait KeyRouter: Send + Sync + fmt::Debug {
    /// Pick the connection for `key` among `shards` connections.
    ///
    /// Implementations return an error when `shards` is zero.
    fn select(&self, key: &str, shards: usize) -> Result<ShardIndex>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Always selects the first connection.
///
/// This is the default router. It is only correct for single-shard
/// clusters; with more shards every key still lands on shard 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstShardRouter;

impl KeyRouter for FirstShardRouter {
    fn select(&self, _key: &str, shards: usize) -> Result<ShardIndex> {
        if shards == 0 {
            return Err(Error::ShardNotFound { index: 0, shards });
        }
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "first_shard"
    }
}

/// Selects `xxhash64(key) mod shards`.
///
/// Cheap and even, but moves most keys when the shard count changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModuloRouter;

impl KeyRouter for ModuloRouter {
    fn select(&self, key: &str, shards: usize) -> Result<ShardIndex> {
        if shards == 0 {
            return Err(Error::ShardNotFound { index: 0, shards });
        }
        Ok((hash_key(key.as_bytes()) % shards as u64) as usize)
    }

    fn name(&self) -> &'static str {
        "modulo"
    }
}

/// xxHash64 of a key, seed 0.
pub(crate) fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    hasher.finish()
}
