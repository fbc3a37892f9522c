//! Redis-backed store.
//!
//! One `RedisStore` serves all three store roles. Counter and bucket
//! updates run as Lua scripts so increment-and-read is a single atomic
//! round trip shared by every instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use std::net::IpAddr;
use std::time::Duration;

use crate::blocking::types::{IpBlockInfo, IpViolation};
use crate::store::{
    BlockRegistry, BucketSpec, BucketState, CounterHit, CounterStore, StoreError, StoreResult,
    ViolationLog,
};

const INCR_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

const TAKE_TOKEN_SCRIPT: &str = r#"
local capacity = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local state = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
  tokens = capacity
  ts = now
end
local elapsed = math.max(0, now - ts)
tokens = math.min(capacity, tokens + elapsed * rate)
local allowed = 0
if tokens + 1e-9 >= 1 then
  tokens = math.max(0, tokens - 1)
  allowed = 1
end
redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'ts', math.max(ts, now))
redis.call('PEXPIRE', KEYS[1], ttl)
return {allowed, tostring(tokens)}
"#;

const APPEND_VIOLATION_SCRIPT: &str = r#"
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', '(' .. ARGV[3])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
return 1
"#;

fn unavailable(error: redis::RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

fn ttl_ms(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Redis implementation of the counter store, violation log and block registry.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    key_prefix: String,
}

impl RedisStore {
    /// Connect to `url` and namespace every key under `key_prefix`.
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let connection = ConnectionManager::new(client).await.map_err(unavailable)?;
        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
        })
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    fn violations_key(&self, ip: IpAddr) -> String {
        format!("{}:violations:{ip}", self.key_prefix)
    }

    fn block_key(&self, ip: IpAddr) -> String {
        format!("{}:block:{ip}", self.key_prefix)
    }

    fn decode_block(key: &str, raw: &str) -> StoreResult<IpBlockInfo> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<CounterHit> {
        let mut connection = self.connection.clone();
        let script = Script::new(INCR_SCRIPT);
        let (count, ttl_left): (i64, i64) = script
            .key(self.key_for(key))
            .arg(ttl_ms(ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;

        Ok(CounterHit {
            count: u64::try_from(count).unwrap_or(0),
            ttl_remaining: Duration::from_millis(u64::try_from(ttl_left).unwrap_or(0)),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Option<u64>> {
        let mut connection = self.connection.clone();
        redis::cmd("GET")
            .arg(self.key_for(key))
            .query_async::<Option<u64>>(&mut connection)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(self.key_for(key))
            .query_async::<()>(&mut connection)
            .await
            .map_err(unavailable)
    }

    async fn take_token(&self, key: &str, spec: BucketSpec, now_ms: i64) -> StoreResult<BucketState> {
        let mut connection = self.connection.clone();
        let redis_key = self.key_for(key);
        let script = Script::new(TAKE_TOKEN_SCRIPT);
        let (allowed, tokens): (i64, String) = script
            .key(&redis_key)
            .arg(spec.capacity)
            .arg(spec.refill_per_ms)
            .arg(now_ms)
            .arg(ttl_ms(spec.ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(unavailable)?;

        let tokens = tokens.parse::<f64>().map_err(|e| StoreError::Corrupt {
            key: redis_key,
            reason: e.to_string(),
        })?;

        Ok(BucketState {
            allowed: allowed == 1,
            tokens,
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[async_trait]
impl ViolationLog for RedisStore {
    async fn append(&self, violation: &IpViolation, retention: Duration) -> StoreResult<()> {
        let key = self.violations_key(violation.ip);
        let member = serde_json::to_string(violation).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let score = violation.timestamp.timestamp_millis();
        let retention_ms = ttl_ms(retention);
        let cutoff = score.saturating_sub(i64::try_from(retention_ms).unwrap_or(i64::MAX));

        let mut connection = self.connection.clone();
        let script = Script::new(APPEND_VIOLATION_SCRIPT);
        script
            .key(key)
            .arg(score)
            .arg(member)
            .arg(cutoff)
            .arg(retention_ms)
            .invoke_async::<i64>(&mut connection)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn since(&self, ip: IpAddr, since: DateTime<Utc>) -> StoreResult<Vec<IpViolation>> {
        let key = self.violations_key(ip);
        let mut connection = self.connection.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&key)
            .arg(since.timestamp_millis())
            .arg("+inf")
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        members
            .iter()
            .map(|raw| {
                serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
                    key: key.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl BlockRegistry for RedisStore {
    async fn get(&self, ip: IpAddr) -> StoreResult<Option<IpBlockInfo>> {
        let key = self.block_key(ip);
        let mut connection = self.connection.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        raw.map(|raw| Self::decode_block(&key, &raw)).transpose()
    }

    async fn put(&self, info: &IpBlockInfo, ttl: Duration) -> StoreResult<Option<IpBlockInfo>> {
        let key = self.block_key(info.ip);
        let value = serde_json::to_string(info).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let mut connection = self.connection.clone();
        let previous: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms(ttl))
            .arg("GET")
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        previous.map(|raw| Self::decode_block(&key, &raw)).transpose()
    }

    async fn remove(&self, ip: IpAddr) -> StoreResult<Option<IpBlockInfo>> {
        let key = self.block_key(ip);
        let mut connection = self.connection.clone();
        let previous: Option<String> = redis::cmd("GETDEL")
            .arg(&key)
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;
        previous.map(|raw| Self::decode_block(&key, &raw)).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<IpBlockInfo>> {
        let pattern = format!("{}:block:*", self.key_prefix);
        let mut connection = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys: Vec<String> = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut connection)
                .await
                .map_err(unavailable)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut connection)
            .await
            .map_err(unavailable)?;

        keys.iter()
            .zip(values)
            .filter_map(|(key, raw)| raw.map(|raw| Self::decode_block(key, &raw)))
            .collect()
    }
}
