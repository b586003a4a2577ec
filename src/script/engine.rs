//! Native rendition of the shard procedures for in-process shards.
//!
//! [`ShardState`] holds the record maps of one shard. The owner must
//! serialize calls to [`ShardState::execute`] (one lock per shard), which
//! gives each procedure the same all-or-nothing visibility as a Lua script
//! on Redis.

use super::{Reply, ScriptCall};
use crate::types::{FieldMap, Timestamp, FIELD_TIMESTAMP, FIELD_TOMBSTONE, FIELD_TTL};
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// One stored record map plus its expiry.
#[derive(Debug, Clone)]
struct StoredRecord {
    fields: FieldMap,
    expires_at: Option<Instant>,
}

impl StoredRecord {
    fn empty() -> Self {
        Self {
            fields: FieldMap::new(),
            expires_at: None,
        }
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.fields
            .get(FIELD_TIMESTAMP)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|s| s.parse().ok())
    }

    fn is_tombstoned(&self) -> bool {
        self.fields.contains_key(FIELD_TOMBSTONE)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }

    /// Remaining TTL in whole seconds, rounded like Redis `TTL`.
    /// `-1` when the record never expires.
    fn remaining_ttl(&self, now: Instant) -> i64 {
        match self.expires_at {
            None => -1,
            Some(at) => {
                let ms = at.saturating_duration_since(now).as_millis();
                ((ms + 500) / 1000) as i64
            }
        }
    }

    fn snapshot(&self, now: Instant) -> FieldMap {
        let mut fields = self.fields.clone();
        fields.insert(
            FIELD_TTL.to_string(),
            Bytes::from(self.remaining_ttl(now).to_string()),
        );
        fields
    }
}

/// Record maps of one in-process shard.
#[derive(Debug, Default)]
pub struct ShardState {
    records: HashMap<String, StoredRecord>,
}

impl ShardState {
    /// Create an empty shard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one procedure against the shard at time `now`.
    pub fn execute(&mut self, call: &ScriptCall, now: Instant) -> Reply {
        match call {
            ScriptCall::Put {
                key,
                timestamp,
                field,
                value,
                ttl_secs,
            } => Reply::Prior(self.put(key, *timestamp, field, value, *ttl_secs, now)),
            ScriptCall::Get { key } => Reply::Record(self.get(key, now)),
            ScriptCall::Delete { key, timestamp } => {
                Reply::Record(self.delete(key, *timestamp, now))
            }
            ScriptCall::MultiGet { keys } => Reply::Records(
                keys.iter().filter_map(|key| self.get(key, now)).collect(),
            ),
            ScriptCall::MultiDelete { timestamp, keys } => Reply::Records(
                keys.iter()
                    .filter_map(|key| self.delete(key, *timestamp, now))
                    .collect(),
            ),
        }
    }

    /// Number of stored records, tombstoned ones included, expired excluded.
    pub fn len(&self, now: Instant) -> usize {
        self.records.values().filter(|r| !r.is_expired(now)).count()
    }

    /// Drop expired records. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        before - self.records.len()
    }

    /// Remove every record.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Look up a record, dropping it first if it has expired.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut StoredRecord> {
        if self.records.get(key).map_or(false, |r| r.is_expired(now)) {
            self.records.remove(key);
        }
        self.records.get_mut(key)
    }

    fn put(
        &mut self,
        key: &str,
        timestamp: Timestamp,
        field: &str,
        value: &Bytes,
        ttl_secs: i64,
        now: Instant,
    ) -> Option<Timestamp> {
        let prior = self.live(key, now).and_then(|r| r.timestamp());

        let accept = match prior {
            None => true,
            Some(stored) => timestamp > stored,
        };

        if accept {
            let record = self
                .records
                .entry(key.to_string())
                .or_insert_with(StoredRecord::empty);
            record.fields.insert(
                FIELD_TIMESTAMP.to_string(),
                Bytes::from(timestamp.to_string()),
            );
            record.fields.insert(field.to_string(), value.clone());
            record.fields.remove(FIELD_TOMBSTONE);
            // A deadline past the end of `Instant` never comes: no expiry.
            record.expires_at = if ttl_secs > 0 {
                now.checked_add(Duration::from_secs(ttl_secs as u64))
            } else {
                None
            };
        }

        prior
    }

    fn get(&mut self, key: &str, now: Instant) -> Option<FieldMap> {
        let record = self.live(key, now)?;
        if record.is_tombstoned() {
            return None;
        }
        Some(record.snapshot(now))
    }

    fn delete(&mut self, key: &str, timestamp: Timestamp, now: Instant) -> Option<FieldMap> {
        let record = self.live(key, now)?;

        let accept = match record.timestamp() {
            None => true,
            Some(stored) => timestamp >= stored,
        };
        if !accept {
            return None;
        }

        record
            .fields
            .insert(FIELD_TOMBSTONE.to_string(), Bytes::from_static(b"1"));
        record.fields.insert(
            FIELD_TIMESTAMP.to_string(),
            Bytes::from(timestamp.to_string()),
        );
        Some(record.snapshot(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;

    fn put(key: &str, ts: Timestamp, value: &str, ttl: i64) -> ScriptCall {
        ScriptCall::Put {
            key: format!("h:test:{}", key),
            timestamp: ts,
            field: key.to_string(),
            value: Bytes::copy_from_slice(value.as_bytes()),
            ttl_secs: ttl,
        }
    }

    fn get(key: &str) -> ScriptCall {
        ScriptCall::Get {
            key: format!("h:test:{}", key),
        }
    }

    fn delete(key: &str, ts: Timestamp) -> ScriptCall {
        ScriptCall::Delete {
            key: format!("h:test:{}", key),
            timestamp: ts,
        }
    }

    fn read(shard: &mut ShardState, key: &str, now: Instant) -> Option<Record> {
        shard
            .execute(&get(key), now)
            .into_records()
            .first()
            .and_then(Record::from_fields)
    }

    #[test]
    fn test_put_then_get() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        let reply = shard.execute(&put("1", 100, "one", 60), now);
        assert_eq!(reply, Reply::Prior(None));

        let record = read(&mut shard, "1", now).unwrap();
        assert_eq!(record.key, "1");
        assert_eq!(record.value, Bytes::from("one"));
        assert_eq!(record.ttl, 60);
    }

    #[test]
    fn test_put_newer_replaces() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "old", 60), now);
        let reply = shard.execute(&put("1", 101, "new", 60), now);

        assert_eq!(reply.prior(), Some(100));
        assert_eq!(read(&mut shard, "1", now).unwrap().value, Bytes::from("new"));
    }

    #[test]
    fn test_put_older_or_equal_rejected() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "first", 60), now);
        shard.execute(&put("1", 99, "older", 60), now);
        assert_eq!(read(&mut shard, "1", now).unwrap().value, Bytes::from("first"));

        // Equal timestamps: the earlier writer wins.
        let reply = shard.execute(&put("1", 100, "same", 60), now);
        assert_eq!(reply.prior(), Some(100));
        assert_eq!(read(&mut shard, "1", now).unwrap().value, Bytes::from("first"));
    }

    #[test]
    fn test_delete_equal_timestamp_wins() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "v", 60), now);
        let reply = shard.execute(&delete("1", 100), now);

        let snapshot = reply.into_records();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].contains_key(FIELD_TOMBSTONE));
        assert!(snapshot[0].contains_key(FIELD_TTL));
        assert!(read(&mut shard, "1", now).is_none());
    }

    #[test]
    fn test_delete_older_ignored() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "v", 60), now);
        let reply = shard.execute(&delete("1", 99), now);

        assert!(reply.is_empty());
        assert!(read(&mut shard, "1", now).is_some());
    }

    #[test]
    fn test_delete_missing_record_is_noop() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        assert!(shard.execute(&delete("ghost", 100), now).is_empty());
        assert_eq!(shard.len(now), 0);
    }

    #[test]
    fn test_resurrection_needs_strictly_newer_put() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "v1", 60), now);
        shard.execute(&delete("1", 105), now);

        // Older than the tombstone, and equal to it: both rejected.
        shard.execute(&put("1", 103, "stale", 60), now);
        assert!(read(&mut shard, "1", now).is_none());
        shard.execute(&put("1", 105, "tie", 60), now);
        assert!(read(&mut shard, "1", now).is_none());

        shard.execute(&put("1", 106, "back", 60), now);
        let record = read(&mut shard, "1", now).unwrap();
        assert_eq!(record.value, Bytes::from("back"));
    }

    #[test]
    fn test_ttl_never_persisted() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "v", 60), now);
        let _ = read(&mut shard, "1", now);

        let stored = &shard.records["h:test:1"];
        assert!(!stored.fields.contains_key(FIELD_TTL));
    }

    #[test]
    fn test_expiry() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "v", 10), now);
        shard.execute(&put("2", 100, "v", 0), now);

        let later = now + Duration::from_secs(4);
        assert_eq!(read(&mut shard, "1", later).unwrap().ttl, 6);
        assert_eq!(read(&mut shard, "2", later).unwrap().ttl, -1);

        let expired = now + Duration::from_secs(10);
        assert!(read(&mut shard, "1", expired).is_none());
        assert!(read(&mut shard, "2", expired).is_some());
        assert_eq!(shard.len(expired), 1);
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "v", i64::MAX), now);

        let record = read(&mut shard, "1", now + Duration::from_secs(3600)).unwrap();
        assert_eq!(record.value, "v");
        assert_ne!(record.ttl, 0);
    }

    #[test]
    fn test_expired_record_accepts_any_put() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "v", 1), now);
        let later = now + Duration::from_secs(2);

        let reply = shard.execute(&put("1", 50, "fresh", 60), later);
        assert_eq!(reply.prior(), None);
        assert_eq!(read(&mut shard, "1", later).unwrap().value, Bytes::from("fresh"));
    }

    #[test]
    fn test_multi_get_skips_missing_and_tombstoned() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        for key in ["1", "2", "3"] {
            shard.execute(&put(key, 100, key, 60), now);
        }
        shard.execute(&delete("2", 200), now);

        let keys = ["1", "2", "3", "4"]
            .iter()
            .map(|k| format!("h:test:{}", k))
            .collect();
        let records = shard.execute(&ScriptCall::MultiGet { keys }, now).into_records();

        let mut found: Vec<String> = records
            .iter()
            .filter_map(Record::from_fields)
            .map(|r| r.key)
            .collect();
        found.sort();
        assert_eq!(found, vec!["1", "3"]);
    }

    #[test]
    fn test_multi_delete_applies_per_key_rule() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 100, "a", 60), now);
        shard.execute(&put("2", 300, "b", 60), now);

        let keys = vec!["h:test:1".to_string(), "h:test:2".to_string()];
        let deleted = shard
            .execute(&ScriptCall::MultiDelete { timestamp: 200, keys }, now)
            .into_records();

        assert_eq!(deleted.len(), 1);
        assert!(read(&mut shard, "1", now).is_none());
        assert!(read(&mut shard, "2", now).is_some());
    }

    #[test]
    fn test_purge_and_clear() {
        let mut shard = ShardState::new();
        let now = Instant::now();

        shard.execute(&put("1", 1, "a", 1), now);
        shard.execute(&put("2", 1, "b", 0), now);

        assert_eq!(shard.purge_expired(now + Duration::from_secs(5)), 1);
        shard.clear();
        assert_eq!(shard.len(now), 0);
    }
}
