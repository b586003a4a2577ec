//! Conflict-resolution procedures executed atomically on one shard.
//!
//! Every record is a field map holding the user's key/value pair plus the
//! reserved fields `_tm_` (logical timestamp) and `_del_` (tombstone). The
//! five procedures below are the only way records are touched:
//!
//! | procedure    | accepts when              | result                       |
//! |--------------|---------------------------|------------------------------|
//! | Put          | no timestamp or `in > tm` | prior timestamp              |
//! | Get          | record live               | snapshot with `_ttl_`        |
//! | Delete       | no timestamp or `in >= tm`| post-tombstone snapshot      |
//! | MultiGet     | per key, as Get           | snapshots of live records    |
//! | MultiDelete  | per key, as Delete        | snapshots of deleted records |
//!
//! Equal timestamps are rejected by Put but accepted by Delete, so a delete
//! wins a tie against a put.
//!
//! Two engines implement the procedures: [`lua`] for Redis shards and
//! [`engine`] for in-process shards.

pub mod engine;
pub mod lua;

pub use engine::ShardState;
pub use lua::ScriptRegistry;

use crate::types::{FieldMap, Timestamp};
use bytes::Bytes;

/// The five shard-side procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Procedure {
    Put,
    Get,
    Delete,
    MultiGet,
    MultiDelete,
}

impl Procedure {
    /// All procedures.
    pub const ALL: [Procedure; 5] = [
        Procedure::Put,
        Procedure::Get,
        Procedure::Delete,
        Procedure::MultiGet,
        Procedure::MultiDelete,
    ];

    /// Short name, used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Procedure::Put => "put",
            Procedure::Get => "get",
            Procedure::Delete => "delete",
            Procedure::MultiGet => "multi_get",
            Procedure::MultiDelete => "multi_delete",
        }
    }
}

/// One invocation of a procedure with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCall {
    /// Write `field = value` under `key` if `timestamp` is newer.
    Put {
        key: String,
        timestamp: Timestamp,
        field: String,
        value: Bytes,
        ttl_secs: i64,
    },

    /// Read a live record.
    Get { key: String },

    /// Tombstone a record if `timestamp` is not older.
    Delete { key: String, timestamp: Timestamp },

    /// Read every live record among `keys`.
    MultiGet { keys: Vec<String> },

    /// Tombstone every record among `keys` whose timestamp is not newer.
    MultiDelete {
        timestamp: Timestamp,
        keys: Vec<String>,
    },
}

impl ScriptCall {
    /// The procedure this call invokes.
    pub fn procedure(&self) -> Procedure {
        match self {
            ScriptCall::Put { .. } => Procedure::Put,
            ScriptCall::Get { .. } => Procedure::Get,
            ScriptCall::Delete { .. } => Procedure::Delete,
            ScriptCall::MultiGet { .. } => Procedure::MultiGet,
            ScriptCall::MultiDelete { .. } => Procedure::MultiDelete,
        }
    }
}

/// Reply of one procedure on one shard.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Put: timestamp held before the call.
    Prior(Option<Timestamp>),

    /// Get / Delete: record snapshot, if any.
    Record(Option<FieldMap>),

    /// MultiGet / MultiDelete: snapshots of the matching records.
    Records(Vec<FieldMap>),
}

impl Reply {
    /// True when the reply carries nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Reply::Prior(prior) => prior.is_none(),
            Reply::Record(record) => record.is_none(),
            Reply::Records(records) => records.is_empty(),
        }
    }

    /// Flatten the reply into record snapshots.
    pub fn into_records(self) -> Vec<FieldMap> {
        match self {
            Reply::Prior(_) => Vec::new(),
            Reply::Record(record) => record.into_iter().collect(),
            Reply::Records(records) => records,
        }
    }

    /// Prior timestamp of a Put reply.
    pub fn prior(&self) -> Option<Timestamp> {
        match self {
            Reply::Prior(prior) => *prior,
            _ => None,
        }
    }
}

/// Build a field map from a flat `[name, value, name, value, ...]` list.
///
/// A trailing unpaired entry is ignored.
pub(crate) fn pairs_to_fields(flat: Vec<Vec<u8>>) -> FieldMap {
    let mut fields = FieldMap::new();
    let mut iter = flat.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        fields.insert(
            String::from_utf8_lossy(&name).into_owned(),
            Bytes::from(value),
        );
    }
    fields
}
