//! Connections to backend shards.
//!
//! A [`Connection`] is one logical link to one shard. It runs the shard
//! procedures atomically and answers a couple of housekeeping commands.
//!
//! - [`RedisConnection`]: pooled connections to a Redis server, procedures
//!   run as Lua scripts.
//! - [`MemoryShard`]: an in-process shard, procedures run natively.
//! - [`FanOut`]: runs one call on many connections and merges the replies.

mod fanout;
mod memory;
mod redis_shard;

pub use self::fanout::{FanOut, FanOutReply};
pub use self::memory::MemoryShard;
pub use self::redis_shard::RedisConnection;

use crate::error::Result;
use crate::script::{Reply, ScriptCall, ScriptRegistry};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A link to one backend shard.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Address of the shard, used in logs and error reports.
    fn addr(&self) -> &str;

    /// Check that the shard answers.
    async fn ping(&self) -> Result<()>;

    /// Run one procedure atomically on the shard.
    async fn run(&self, scripts: &ScriptRegistry, call: &ScriptCall) -> Result<Reply>;

    /// Remove every record held by the shard.
    async fn flush(&self) -> Result<()>;
}

/// Shared handle to a connection.
pub type SharedConnection = Arc<dyn Connection>;
