//! The shared key-value store behind the cache.
//!
//! [`CacheStore`] is the only seam through which the cache touches shared
//! state. Operations are not retried here; the engine decides how each
//! failure degrades.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;

/// Errors produced by a [`CacheStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Boxed future returned by [`CacheStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A key-value store with per-entry expiry.
///
/// Implementations must honour the TTL given to [`set`](Self::set) without
/// extending it on reads; the engine derives an entry's age from
/// `ttl - time_to_live`.
pub trait CacheStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Bytes>>;

    /// Stores `value` under `key`, replacing any previous entry, expiring after `ttl`.
    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()>;

    /// Returns the remaining lifetime of `key`, or `None` if it is absent or never expires.
    fn time_to_live<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Duration>>;
}

/// Number of writes between sweeps of expired entries in a [`MemoryStore`].
const SWEEP_EVERY: usize = 256;

/// In-process [`CacheStore`] with expiry measured on the Tokio clock.
///
/// An expired entry is dropped when it is next looked up, and every
/// [`SWEEP_EVERY`]th write also drops every expired entry, so keys that are
/// never requested again do not pile up.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, (Bytes, Instant)>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.map.len();
        let now = Instant::now();
        entries.map.retain(|_, (_, expires_at)| *expires_at > now);
        before - entries.map.len()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Runs `f` on the live entry for `key`, evicting it first if it has expired.
    fn with_live<T>(&self, key: &str, f: impl FnOnce(&Bytes, Instant) -> T) -> Option<T> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.map.get(key) {
            Some((_, expires_at)) if *expires_at <= now => {
                entries.map.remove(key);
                None
            }
            Some((value, expires_at)) => Some(f(value, *expires_at)),
            None => None,
        }
    }
}

impl CacheStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Bytes>> {
        let value = self.with_live(key, |value, _| value.clone());
        Box::pin(async move { Ok::<_, StoreError>(value) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()> {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.writes = entries.writes.wrapping_add(1);
        if entries.writes % SWEEP_EVERY == 0 {
            entries.map.retain(|_, (_, expires_at)| *expires_at > now);
        }
        entries.map.insert(key.to_owned(), (value, now + ttl));
        drop(entries);
        Box::pin(async { Ok::<_, StoreError>(()) })
    }

    fn time_to_live<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Duration>> {
        let remaining = self.with_live(key, |_, expires_at| {
            expires_at.saturating_duration_since(Instant::now())
        });
        Box::pin(async move { Ok::<_, StoreError>(remaining) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_overwrites_and_get_returns_latest() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"one"), Duration::from_secs(10))
            .await
            .unwrap();
        store
            .set("k", Bytes::from_static(b"two"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some(&b"two"[..]));
    }

    #[tokio::test]
    async fn ttl_reports_remaining_lifetime() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(50))
            .await
            .unwrap();
        let remaining = store.time_to_live("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(50));
        assert!(remaining > Duration::from_secs(49));
        assert_eq!(store.time_to_live("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_disappear() {
        let store = MemoryStore::new();
        store
            .set("k", Bytes::from_static(b"v"), Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.time_to_live("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_sweep_keys_that_are_never_read_again() {
        let store = MemoryStore::new();
        for i in 0..SWEEP_EVERY - 1 {
            store
                .set(
                    &format!("host-{i}/feed"),
                    Bytes::from_static(b"v"),
                    Duration::from_millis(1),
                )
                .await
                .unwrap();
        }
        assert_eq!(store.len(), SWEEP_EVERY - 1);
        tokio::time::sleep(Duration::from_millis(20)).await;

        store
            .set("live", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_keeps_live_entries() {
        let store = MemoryStore::new();
        store
            .set("short", Bytes::from_static(b"v"), Duration::from_millis(1))
            .await
            .unwrap();
        store
            .set("long", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("long").await.unwrap().as_deref(), Some(&b"v"[..]));
    }
}
