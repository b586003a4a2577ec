//! In-process shard.

use super::Connection;
use crate::error::Result;
use crate::script::{Reply, ScriptCall, ScriptRegistry, ShardState};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// A shard living in the current process.
///
/// Procedures run under a single lock, so each one is atomic with respect to
/// every other call on the same shard.
pub struct MemoryShard {
    addr: String,
    state: Mutex<ShardState>,
}

impl MemoryShard {
    /// Create an empty shard identified by `addr`.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            state: Mutex::new(ShardState::new()),
        }
    }

    /// Number of stored records, tombstoned ones included.
    pub fn len(&self) -> usize {
        self.state.lock().len(Instant::now())
    }

    /// True when the shard holds no record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired records.
    pub fn purge_expired(&self) -> usize {
        self.state.lock().purge_expired(Instant::now())
    }
}

#[async_trait]
impl Connection for MemoryShard {
    fn addr(&self) -> &str {
        &self.addr
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn run(&self, _scripts: &ScriptRegistry, call: &ScriptCall) -> Result<Reply> {
        let reply = self.state.lock().execute(call, Instant::now());
        trace!(shard = %self.addr, procedure = call.procedure().name(), "Ran procedure");
        Ok(reply)
    }

    async fn flush(&self) -> Result<()> {
        self.state.lock().clear();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryShard")
            .field("addr", &self.addr)
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_run_and_flush() {
        let shard = MemoryShard::new("mem-0");
        let scripts = ScriptRegistry::new();

        let call = ScriptCall::Put {
            key: "h:a:p:k".into(),
            timestamp: 10,
            field: "k".into(),
            value: Bytes::from("v"),
            ttl_secs: 60,
        };
        shard.run(&scripts, &call).await.unwrap();
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.addr(), "mem-0");

        shard.ping().await.unwrap();
        shard.flush().await.unwrap();
        assert!(shard.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_follows_tokio_clock() {
        let shard = MemoryShard::new("mem-0");
        let scripts = ScriptRegistry::new();

        let call = ScriptCall::Put {
            key: "k".into(),
            timestamp: 1,
            field: "k".into(),
            value: Bytes::from("v"),
            ttl_secs: 5,
        };
        shard.run(&scripts, &call).await.unwrap();

        tokio::time::advance(std::time::Duration::from_secs(6)).await;
        assert_eq!(shard.purge_expired(), 1);
        assert!(shard.is_empty());
    }
}
