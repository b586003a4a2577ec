//! Error types for the sharded cache.

use std::fmt;
use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the sharded cache.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors (no shards, no clusters, missing app name...).
    #[error("config error: {0}")]
    Config(String),

    /// Errors reported by a single backend shard.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// One or more shards failed during a fan-out call.
    #[error("fan-out error: {0}")]
    FanOut(#[from] FanOutError),

    /// Key collides with a reserved record field.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Record lifetime above [`crate::types::MAX_TTL_SECS`].
    #[error("invalid ttl: {0}s exceeds the maximum")]
    InvalidTtl(i64),

    /// The router selected a shard index outside the cluster.
    #[error("shard not found: index {index} of {shards}")]
    ShardNotFound { index: usize, shards: usize },

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors coming from one backend connection.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection could not be established.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// The backend rejected or failed a command or script.
    #[error("command failed on {addr}: {reason}")]
    Command { addr: String, reason: String },

    /// The backend answered with a reply of an unexpected shape.
    #[error("unexpected reply from {addr}: {reason}")]
    Protocol { addr: String, reason: String },

    /// The connection pool was closed.
    #[error("connection pool closed for {0}")]
    PoolClosed(String),
}

impl BackendError {
    /// Wrap a redis error raised while talking to `addr`.
    pub fn redis(addr: &str, err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_refusal() {
            BackendError::ConnectionFailed {
                addr: addr.to_string(),
                reason: err.to_string(),
            }
        } else if err.kind() == redis::ErrorKind::TypeError {
            BackendError::Protocol {
                addr: addr.to_string(),
                reason: err.to_string(),
            }
        } else {
            BackendError::Command {
                addr: addr.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Failure of one shard inside a fan-out call.
#[derive(Debug)]
pub struct ShardFailure {
    /// Address of the failing shard.
    pub addr: String,
    /// The error the shard reported.
    pub error: Error,
}

/// Aggregate of shard failures from a fan-out call.
///
/// `succeeded` counts the shards that answered, so a partial failure can be
/// told apart from a total one.
#[derive(Debug)]
pub struct FanOutError {
    /// Shards that failed, in connection order.
    pub failures: Vec<ShardFailure>,
    /// Number of shards that answered successfully.
    pub succeeded: usize,
}

impl FanOutError {
    /// Total number of shards the call was sent to.
    pub fn shards(&self) -> usize {
        self.failures.len() + self.succeeded
    }

    /// True when every shard failed.
    pub fn is_total(&self) -> bool {
        self.succeeded == 0
    }

    /// Addresses of the failed shards.
    pub fn failed_addrs(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.addr.as_str()).collect()
    }

    /// Convert into a crate error.
    ///
    /// A call sent to a single shard reports that shard's error as is.
    pub fn into_error(self) -> Error {
        if self.shards() == 1 && self.failures.len() == 1 {
            if let Some(only) = self.failures.into_iter().next() {
                return only.error;
            }
            return Error::Internal("fan-out failure without shard".to_string());
        }
        Error::FanOut(self)
    }
}

impl fmt::Display for FanOutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} shards failed",
            self.failures.len(),
            self.shards()
        )?;
        for (i, failure) in self.failures.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}: {}", sep, failure.addr, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for FanOutError {}
