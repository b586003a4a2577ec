//! Core types used throughout the cache.

use bytes::Bytes;
use std::collections::BTreeMap;

/// Logical write time, in seconds.
pub type Timestamp = i64;

/// Position of a connection inside a cluster.
pub type ShardIndex = usize;

/// Field holding the logical timestamp of the last accepted write or delete.
pub const FIELD_TIMESTAMP: &str = "_tm_";

/// Field marking a record as logically deleted.
pub const FIELD_TOMBSTONE: &str = "_del_";

/// Transient field carrying the remaining TTL out of a read.
/// Never persisted.
pub const FIELD_TTL: &str = "_ttl_";

/// Longest accepted record lifetime, in seconds (about a century).
pub const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Returns true if `name` is one of the reserved record fields.
pub fn is_reserved_field(name: &str) -> bool {
    matches!(name, FIELD_TIMESTAMP | FIELD_TOMBSTONE | FIELD_TTL)
}

/// The physical layout of a record: field name to raw value.
pub type FieldMap = BTreeMap<String, Bytes>;

/// A cached record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Logical key, unique within a keyspace.
    pub key: String,
    /// Opaque payload.
    pub value: Bytes,
    /// Time-to-live in seconds. On reads this is the remaining TTL, `-1`
    /// when the record has no expiry. Non-positive on writes means no expiry.
    pub ttl: i64,
}

impl Record {
    /// Create a new record.
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, ttl: i64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    /// Rebuild a record from its stored fields.
    ///
    /// Reserved fields are dropped, `_ttl_` becomes [`Record::ttl`]. Returns
    /// `None` when the map holds no user field.
    pub fn from_fields(fields: &FieldMap) -> Option<Self> {
        let mut record: Option<Record> = None;
        let mut ttl = -1;

        for (name, value) in fields {
            match name.as_str() {
                FIELD_TIMESTAMP | FIELD_TOMBSTONE => {}
                FIELD_TTL => {
                    ttl = std::str::from_utf8(value)
                        .ok()
                        .and_then(|s| s.trim().parse().ok())
                        .unwrap_or(-1);
                }
                _ => {
                    record = Some(Record {
                        key: name.clone(),
                        value: value.clone(),
                        ttl: -1,
                    });
                }
            }
        }

        record.map(|mut r| {
            r.ttl = ttl;
            r
        })
    }
}

/// Acknowledgement of a put.
///
/// The prior timestamp is diagnostic only: it is what the shard held before
/// the call, whether or not the write was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutAck {
    /// Timestamp stored before the write, `None` if the record was new.
    pub prior_timestamp: Option<Timestamp>,
}
