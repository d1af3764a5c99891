//! Redis-backed [`CacheStore`].

use std::time::Duration;

use bytes::Bytes;
use redis::aio::ConnectionManager;
use tracing::info;

use super::store::{CacheStore, StoreError, StoreFuture};
use crate::config::RedisConfig;

/// A [`CacheStore`] over a shared Redis instance.
///
/// Uses a [`ConnectionManager`], which multiplexes one connection across
/// clones and reconnects after failures. Each operation is a single command
/// and none is retried.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Opens a managed connection using `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Redis`] if the URL is invalid or the first
    /// connection attempt fails.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url())?;
        let conn = client.get_connection_manager().await?;
        info!(host = %config.host, port = config.port, db = config.db, "connected to redis");
        Ok(Self { conn })
    }
}

impl CacheStore for RedisStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let value: Option<Vec<u8>> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
            Ok::<_, StoreError>(value.map(Bytes::from))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()> {
        let mut conn = self.conn.clone();
        // PX rejects zero.
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        Box::pin(async move {
            let () = redis::cmd("SET")
                .arg(key)
                .arg(&value[..])
                .arg("PX")
                .arg(millis)
                .query_async(&mut conn)
                .await?;
            Ok::<_, StoreError>(())
        })
    }

    fn time_to_live<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Duration>> {
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let millis: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
            Ok::<_, StoreError>(pttl_to_duration(millis))
        })
    }
}

// PTTL replies -2 for a missing key and -1 for a key without expiry.
fn pttl_to_duration(millis: i64) -> Option<Duration> {
    u64::try_from(millis).ok().map(Duration::from_millis)
}
