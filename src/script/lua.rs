//! Lua renditions of the shard procedures for Redis shards.
//!
//! Records are Redis hashes. The scripts are loaded lazily by `EVALSHA` with
//! an `EVAL` fallback, so a fresh shard needs no preparation.

use super::Procedure;
use crate::types::{FIELD_TIMESTAMP, FIELD_TOMBSTONE, FIELD_TTL, MAX_TTL_SECS};
use redis::Script;

/// Shared helper: inject the remaining TTL, copy the hash, strip the TTL.
const SNAPSHOT_FN: &str = r#"
local function snapshot(key)
  redis.call("HSET", key, "{TTL}", redis.call("TTL", key))
  local fields = redis.call("HGETALL", key)
  redis.call("HDEL", key, "{TTL}")
  return fields
end
"#;

const PUT_SRC: &str = r#"
local ttl = tonumber(ARGV[4])
if ttl == nil or ttl > {MAXTTL} then
  return redis.error_reply("invalid ttl")
end

local tms = redis.call("HGET", KEYS[1], "{TS}")
local in_tms = tonumber(ARGV[1])

if tms == false or in_tms > tonumber(tms) then
  redis.call("HSET", KEYS[1], "{TS}", ARGV[1], ARGV[2], ARGV[3])
  if ttl > 0 then
    redis.call("EXPIRE", KEYS[1], ttl)
  else
    redis.call("PERSIST", KEYS[1])
  end
  redis.call("HDEL", KEYS[1], "{DEL}")
end

return tms
"#;

const GET_SRC: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
  return {}
end
if redis.call("HEXISTS", KEYS[1], "{DEL}") == 1 then
  return {}
end
return snapshot(KEYS[1])
"#;

const DELETE_SRC: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
  return {}
end

local tms = redis.call("HGET", KEYS[1], "{TS}")
local in_tms = tonumber(ARGV[1])

if tms == false or in_tms >= tonumber(tms) then
  redis.call("HSET", KEYS[1], "{DEL}", 1, "{TS}", ARGV[1])
  return snapshot(KEYS[1])
end

return {}
"#;

const MULTI_GET_SRC: &str = r#"
local tbl = {}
for i = 1, #KEYS do
  if redis.call("EXISTS", KEYS[i]) == 1 and redis.call("HEXISTS", KEYS[i], "{DEL}") == 0 then
    tbl[#tbl + 1] = snapshot(KEYS[i])
  end
end
return tbl
"#;

const MULTI_DELETE_SRC: &str = r#"
local in_tms = tonumber(ARGV[1])
local tbl = {}
for i = 1, #KEYS do
  if redis.call("EXISTS", KEYS[i]) == 1 then
    local tms = redis.call("HGET", KEYS[i], "{TS}")
    if tms == false or in_tms >= tonumber(tms) then
      redis.call("HSET", KEYS[i], "{DEL}", 1, "{TS}", ARGV[1])
      tbl[#tbl + 1] = snapshot(KEYS[i])
    end
  end
end
return tbl
"#;

/// The compiled script handles of one cache instance.
///
/// Built once when the cache is constructed and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ScriptRegistry {
    put: Script,
    get: Script,
    delete: Script,
    multi_get: Script,
    multi_delete: Script,
}

impl ScriptRegistry {
    /// Render and hash the five scripts.
    pub fn new() -> Self {
        Self {
            put: Script::new(&render(Procedure::Put)),
            get: Script::new(&render(Procedure::Get)),
            delete: Script::new(&render(Procedure::Delete)),
            multi_get: Script::new(&render(Procedure::MultiGet)),
            multi_delete: Script::new(&render(Procedure::MultiDelete)),
        }
    }

    /// Script handle for a procedure.
    pub fn script(&self, procedure: Procedure) -> &Script {
        match procedure {
            Procedure::Put => &self.put,
            Procedure::Get => &self.get,
            Procedure::Delete => &self.delete,
            Procedure::MultiGet => &self.multi_get,
            Procedure::MultiDelete => &self.multi_delete,
        }
    }

    /// SHA1 of the script for a procedure.
    pub fn sha(&self, procedure: Procedure) -> &str {
        self.script(procedure).get_hash()
    }
}

impl Default for ScriptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Full Lua source of a procedure, with field names substituted.
pub fn render(procedure: Procedure) -> String {
    let body = match procedure {
        Procedure::Put => PUT_SRC,
        Procedure::Get => GET_SRC,
        Procedure::Delete => DELETE_SRC,
        Procedure::MultiGet => MULTI_GET_SRC,
        Procedure::MultiDelete => MULTI_DELETE_SRC,
    };

    let source = match procedure {
        Procedure::Put => body.to_string(),
        _ => format!("{}{}", SNAPSHOT_FN, body),
    };

    source
        .replace("{TS}", FIELD_TIMESTAMP)
        .replace("{DEL}", FIELD_TOMBSTONE)
        .replace("{TTL}", FIELD_TTL)
        .replace("{MAXTTL}", &MAX_TTL_SECS.to_string())
}
