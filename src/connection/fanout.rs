//! Concurrent execution of one call on many connections.

use super::SharedConnection;
use crate::error::{FanOutError, Result, ShardFailure};
use crate::script::{Reply, ScriptCall, ScriptRegistry};
use crate::types::FieldMap;
use futures_util::future::join_all;
use tracing::{debug, warn};

/// A set of connections a call is sent to at once.
///
/// The calls run concurrently and every one of them is awaited; a slow shard
/// delays the whole fan-out, a failing shard does not cancel the others.
#[derive(Debug, Clone, Default)]
pub struct FanOut {
    conns: Vec<SharedConnection>,
}

/// Merged outcome of a fan-out call.
#[derive(Debug)]
pub struct FanOutReply {
    /// Non-empty replies, in connection order.
    pub replies: Vec<Reply>,
    /// Shards that failed, if any.
    pub failure: Option<FanOutError>,
}

impl FanOut {
    pub fn new(conns: Vec<SharedConnection>) -> Self {
        Self { conns }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Addresses of the connections, in order.
    pub fn addrs(&self) -> Vec<&str> {
        self.conns.iter().map(|c| c.addr()).collect()
    }

    /// Run `call` on every connection and merge the replies.
    pub async fn run(&self, scripts: &ScriptRegistry, call: &ScriptCall) -> FanOutReply {
        let results = join_all(self.conns.iter().map(|c| c.run(scripts, call))).await;
        let (replies, failure) = self.gather(results);

        let replies: Vec<Reply> = replies.into_iter().filter(|r| !r.is_empty()).collect();
        debug!(
            procedure = call.procedure().name(),
            shards = self.conns.len(),
            replies = replies.len(),
            failed = failure.as_ref().map_or(0, |f| f.failures.len()),
            "Fan-out complete"
        );

        FanOutReply { replies, failure }
    }

    /// Ping every connection.
    pub async fn ping(&self) -> Result<()> {
        let results = join_all(self.conns.iter().map(|c| c.ping())).await;
        match self.gather(results).1 {
            None => Ok(()),
            Some(failure) => Err(failure.into_error()),
        }
    }

    /// Flush every connection.
    pub async fn flush(&self) -> Result<()> {
        let results = join_all(self.conns.iter().map(|c| c.flush())).await;
        match self.gather(results).1 {
            None => Ok(()),
            Some(failure) => Err(failure.into_error()),
        }
    }

    fn gather<T>(&self, results: Vec<Result<T>>) -> (Vec<T>, Option<FanOutError>) {
        let mut ok = Vec::with_capacity(results.len());
        let mut failures = Vec::new();

        for (conn, result) in self.conns.iter().zip(results) {
            match result {
                Ok(value) => ok.push(value),
                Err(error) => {
                    warn!(shard = %conn.addr(), error = %error, "Shard call failed");
                    failures.push(ShardFailure {
                        addr: conn.addr().to_string(),
                        error,
                    });
                }
            }
        }

        let failure = if failures.is_empty() {
            None
        } else {
            Some(FanOutError {
                failures,
                succeeded: ok.len(),
            })
        };
        (ok, failure)
    }
}

impl FanOutReply {
    /// True when every shard answered.
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }

    /// The replies, or the failure if any shard failed.
    ///
    /// A fan-out over a single connection reports that connection's error
    /// as is.
    pub fn into_result(self) -> Result<Vec<Reply>> {
        match self.failure {
            None => Ok(self.replies),
            Some(failure) => Err(failure.into_error()),
        }
    }

    /// Every record snapshot carried by the replies, in order.
    pub fn records(&self) -> Vec<FieldMap> {
        self.replies
            .iter()
            .cloned()
            .flat_map(Reply::into_records)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Connection, MemoryShard};
    use crate::error::{BackendError, Error};
    use crate::testing::faults::{FaultMode, FaultyConnection};
    use bytes::Bytes;
    use std::sync::Arc;

    fn put(key: &str) -> ScriptCall {
        ScriptCall::Put {
            key: key.to_string(),
            timestamp: 100,
            field: key.to_string(),
            value: Bytes::from("v"),
            ttl_secs: 60,
        }
    }

    fn multi_get(keys: &[&str]) -> ScriptCall {
        ScriptCall::MultiGet {
            keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_replies_concatenated() {
        let a = Arc::new(MemoryShard::new("mem-a"));
        let b = Arc::new(MemoryShard::new("mem-b"));
        let scripts = ScriptRegistry::new();

        a.run(&scripts, &put("k1")).await.unwrap();
        b.run(&scripts, &put("k2")).await.unwrap();

        let fan = FanOut::new(vec![a as SharedConnection, b as SharedConnection]);
        assert_eq!(fan.addrs(), vec!["mem-a", "mem-b"]);

        let reply = fan.run(&scripts, &multi_get(&["k1", "k2"])).await;
        assert!(reply.is_complete());
        assert_eq!(reply.records().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_replies_dropped() {
        let fan = FanOut::new(vec![
            Arc::new(MemoryShard::new("mem-a")) as SharedConnection,
            Arc::new(MemoryShard::new("mem-b")) as SharedConnection,
        ]);
        let scripts = ScriptRegistry::new();

        let reply = fan
            .run(&scripts, &ScriptCall::Get { key: "nope".into() })
            .await;
        assert!(reply.is_complete());
        assert!(reply.replies.is_empty());
        assert!(reply.into_result().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let good = Arc::new(MemoryShard::new("mem-good"));
        let bad = Arc::new(FaultyConnection::new(Arc::new(MemoryShard::new("mem-bad"))));
        bad.set_mode(FaultMode::Fail);

        let scripts = ScriptRegistry::new();
        good.run(&scripts, &put("k1")).await.unwrap();

        let fan = FanOut::new(vec![good as SharedConnection, bad as SharedConnection]);
        let reply = fan.run(&scripts, &multi_get(&["k1"])).await;

        assert!(!reply.is_complete());
        assert_eq!(reply.records().len(), 1);
        let failure = reply.failure.as_ref().unwrap();
        assert_eq!(failure.succeeded, 1);
        assert!(!failure.is_total());
        assert_eq!(failure.failed_addrs(), vec!["mem-bad"]);

        match reply.into_result() {
            Err(Error::FanOut(f)) => assert_eq!(f.shards(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_connection_error_unwrapped() {
        let bad = Arc::new(FaultyConnection::new(Arc::new(MemoryShard::new("mem-0"))));
        bad.set_mode(FaultMode::Fail);
        let fan = FanOut::new(vec![bad as SharedConnection]);

        let err = fan.ping().await.unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::Command { .. })));
    }

    #[tokio::test]
    async fn test_total_failure() {
        let a = Arc::new(FaultyConnection::new(Arc::new(MemoryShard::new("mem-a"))));
        let b = Arc::new(FaultyConnection::new(Arc::new(MemoryShard::new("mem-b"))));
        a.set_mode(FaultMode::Fail);
        b.set_mode(FaultMode::Fail);

        let fan = FanOut::new(vec![a as SharedConnection, b as SharedConnection]);
        match fan.flush().await {
            Err(Error::FanOut(f)) => {
                assert!(f.is_total());
                assert_eq!(f.failures.len(), 2);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
