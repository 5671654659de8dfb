// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Redis implementation of the `tollgate` coordination store.
//!
//! [`RedisCoordinator`] lets every process of a fleet share one circuit breaker
//! record and one global rate-limit window per vendor. Each operation is a single
//! command or a Lua script, so it is atomic on the Redis server.
//!
//! | Operation | Redis |
//! |---|---|
//! | `get` | `GET` |
//! | `compare_and_swap` | script: `GET`, compare, `SET PX` |
//! | `increment` | script: `INCR`, `PEXPIRE` on creation |
//! | `delete` | `DEL` |
//! | `sliding_window_acquire` | script on a sorted set: `ZREMRANGEBYSCORE`, `ZCARD`, `ZADD` |
//! | `sliding_window_release` | `ZREM` |
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tollgate_redis::RedisCoordinator;
//!
//! # async fn connect() -> Result<(), tollgate::CoordinatorError> {
//! let coordinator = Arc::new(RedisCoordinator::connect("redis://127.0.0.1:6379").await?);
//! # Ok(())
//! # }
//! ```

use std::fmt::{self, Debug};
use std::time::Duration;

use redis::Script;
use redis::aio::ConnectionManager;
use tollgate::{CoordinatorError, SharedCoordinator, WindowDecision, WindowRequest};

const COMPARE_AND_SWAP: &str = r"
local current = redis.call('GET', KEYS[1])
if ARGV[1] == '1' then
    if current ~= ARGV[2] then
        return 0
    end
elseif current then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3], 'PX', ARGV[4])
return 1
";

const INCREMENT: &str = r"
local value = redis.call('INCR', KEYS[1])
if value == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return value
";

// Returns -1 when the member was added, otherwise the milliseconds until the oldest entry expires.
const WINDOW_ACQUIRE: &str = r"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
if redis.call('ZCARD', KEYS[1]) < tonumber(ARGV[3]) then
    redis.call('ZADD', KEYS[1], now, ARGV[4])
    redis.call('PEXPIRE', KEYS[1], window)
    return -1
end
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return math.max(tonumber(oldest[2]) + window - now, 1)
";

/// A [`SharedCoordinator`] backed by Redis.
///
/// Cloning is cheap; clones share the connection.
#[derive(Clone)]
pub struct RedisCoordinator {
    connection: ConnectionManager,
    compare_and_swap: Script,
    increment: Script,
    window_acquire: Script,
}

impl Debug for RedisCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCoordinator").finish_non_exhaustive()
    }
}

impl RedisCoordinator {
    /// Connects to the Redis server at `url`.
    ///
    /// The connection reconnects on its own after failures.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinatorError`] when the URL is invalid or the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, CoordinatorError> {
        let client = redis::Client::open(url).map_err(|error| CoordinatorError::caused_by("invalid Redis URL", error))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|error| CoordinatorError::caused_by("cannot connect to Redis", error))?;

        tracing::event!(name: "tollgate.redis.connected", tracing::Level::INFO, redis.url = %redact(url));

        Ok(Self::from_connection_manager(connection))
    }

    /// Uses an existing connection.
    #[must_use]
    pub fn from_connection_manager(connection: ConnectionManager) -> Self {
        Self {
            connection,
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
            increment: Script::new(INCREMENT),
            window_acquire: Script::new(WINDOW_ACQUIRE),
        }
    }
}

impl SharedCoordinator for RedisCoordinator {
    async fn get(&self, key: &str) -> Result<Option<String>, CoordinatorError> {
        let mut connection = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection)
            .await
            .map_err(|error| failed("GET", key, error))
    }

    async fn compare_and_swap(&self, key: &str, expected: Option<&str>, new: &str, ttl: Duration) -> Result<bool, CoordinatorError> {
        let mut connection = self.connection.clone();
        let (flag, expected) = expected.map_or(("0", ""), |expected| ("1", expected));

        let swapped: i64 = self
            .compare_and_swap
            .key(key)
            .arg(flag)
            .arg(expected)
            .arg(new)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(|error| failed("compare-and-swap", key, error))?;

        Ok(swapped == 1)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CoordinatorError> {
        let mut connection = self.connection.clone();
        self.increment
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut connection)
            .await
            .map_err(|error| failed("increment", key, error))
    }

    async fn delete(&self, key: &str) -> Result<(), CoordinatorError> {
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<i64>(&mut connection)
            .await
            .map_err(|error| failed("DEL", key, error))?;
        Ok(())
    }

    async fn sliding_window_acquire(&self, key: &str, request: WindowRequest<'_>) -> Result<WindowDecision, CoordinatorError> {
        let mut connection = self.connection.clone();

        let outcome: i64 = self
            .window_acquire
            .key(key)
            .arg(request.now_millis)
            .arg(ttl_millis(request.window))
            .arg(request.limit)
            .arg(request.member)
            .invoke_async(&mut connection)
            .await
            .map_err(|error| failed("sliding-window acquire", key, error))?;

        Ok(match u64::try_from(outcome) {
            Ok(retry_after) => WindowDecision::Full {
                retry_after: Duration::from_millis(retry_after.max(1)),
            },
            Err(_) => WindowDecision::Acquired,
        })
    }

    async fn sliding_window_release(&self, key: &str, member: &str) -> Result<(), CoordinatorError> {
        let mut connection = self.connection.clone();
        redis::cmd("ZREM")
            .arg(key)
            .arg(member)
            .query_async::<i64>(&mut connection)
            .await
            .map_err(|error| failed("ZREM", key, error))?;
        Ok(())
    }
}

fn failed(operation: &str, key: &str, error: redis::RedisError) -> CoordinatorError {
    CoordinatorError::caused_by(format!("{operation} on '{key}' failed"), error)
}

/// `PX` and `PEXPIRE` reject zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Drops credentials from a connection URL before it is logged.
fn redact(url: &str) -> &str {
    url.rsplit_once('@').map_or(url, |(_, host)| host)
}
