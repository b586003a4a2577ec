//! Fault injection for shard connections.
//!
//! [`FaultyConnection`] wraps any connection and fails or delays calls
//! according to a [`FaultMode`] that can be switched while a test runs.
//!
//! ```rust,ignore
//! let shard = Arc::new(FaultyConnection::new(Arc::new(MemoryShard::new("mem-0"))));
//! shard.set_mode(FaultMode::FailEvery(3));
//! ```

use crate::connection::{Connection, SharedConnection};
use crate::error::{BackendError, Result};
use crate::script::{Reply, ScriptCall, ScriptRegistry};
use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// How a [`FaultyConnection`] misbehaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FaultMode {
    /// Pass every call through.
    Off,

    /// Fail every call.
    Fail,

    /// Fail every Nth call, counting from the first.
    FailEvery(u64),

    /// Fail each call with the given probability (0.0 - 1.0).
    Probability(f64),

    /// Sleep before passing the call through.
    Delay(Duration),
}

/// A connection that injects failures in front of another one.
#[derive(Debug)]
pub struct FaultyConnection {
    inner: SharedConnection,
    mode: RwLock<FaultMode>,
    calls: AtomicU64,
    injected: AtomicU64,
}

impl FaultyConnection {
    pub fn new(inner: SharedConnection) -> Self {
        Self {
            inner,
            mode: RwLock::new(FaultMode::Off),
            calls: AtomicU64::new(0),
            injected: AtomicU64::new(0),
        }
    }

    pub fn set_mode(&self, mode: FaultMode) {
        *self.mode.write() = mode;
    }

    pub fn mode(&self) -> FaultMode {
        *self.mode.read()
    }

    /// Calls seen so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Calls failed on purpose so far.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::Relaxed)
    }

    async fn inject(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let mode = self.mode();

        if let FaultMode::Delay(delay) = mode {
            tokio::time::sleep(delay).await;
            return Ok(());
        }

        let fail = match mode {
            FaultMode::Off | FaultMode::Delay(_) => false,
            FaultMode::Fail => true,
            FaultMode::FailEvery(n) => n > 0 && call % n == 0,
            FaultMode::Probability(p) => roll(p),
        };

        if fail {
            self.injected.fetch_add(1, Ordering::Relaxed);
            debug!(shard = %self.inner.addr(), call, "Injecting fault");
            return Err(BackendError::Command {
                addr: self.inner.addr().to_string(),
                reason: "injected fault".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

fn roll(probability: f64) -> bool {
    rand::rng().random::<f64>() < probability
}

#[async_trait]
impl Connection for FaultyConnection {
    fn addr(&self) -> &str {
        self.inner.addr()
    }

    async fn ping(&self) -> Result<()> {
        self.inject().await?;
        self.inner.ping().await
    }

    async fn run(&self, scripts: &ScriptRegistry, call: &ScriptCall) -> Result<Reply> {
        self.inject().await?;
        self.inner.run(scripts, call).await
    }

    async fn flush(&self) -> Result<()> {
        self.inject().await?;
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MemoryShard;
    use std::sync::Arc;

    fn faulty() -> FaultyConnection {
        FaultyConnection::new(Arc::new(MemoryShard::new("mem-0")))
    }

    #[tokio::test]
    async fn test_off_passes_through() {
        let conn = faulty();
        assert_eq!(conn.mode(), FaultMode::Off);
        conn.ping().await.unwrap();
        assert_eq!(conn.calls(), 1);
        assert_eq!(conn.injected(), 0);
    }

    #[tokio::test]
    async fn test_fail_every() {
        let conn = faulty();
        conn.set_mode(FaultMode::FailEvery(3));

        let mut outcomes = Vec::new();
        for _ in 0..6 {
            outcomes.push(conn.ping().await.is_ok());
        }
        assert_eq!(outcomes, vec![true, true, false, true, true, false]);
        assert_eq!(conn.injected(), 2);
    }

    #[tokio::test]
    async fn test_probability_bounds() {
        let conn = faulty();

        conn.set_mode(FaultMode::Probability(0.0));
        for _ in 0..20 {
            conn.ping().await.unwrap();
        }

        conn.set_mode(FaultMode::Probability(1.0));
        for _ in 0..20 {
            assert!(conn.ping().await.is_err());
        }
        assert_eq!(conn.injected(), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay() {
        let conn = faulty();
        conn.set_mode(FaultMode::Delay(Duration::from_secs(5)));

        let start = tokio::time::Instant::now();
        conn.ping().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
