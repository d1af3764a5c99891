//! Stale-while-revalidate response caching.
//!
//! [`AsyncCache`] sits in front of a slow backend as a [`Middleware`](crate::middleware::Middleware).
//! Responses are stored in a shared [`CacheStore`] under a [`CacheKey`] made of
//! host and path, with a lifetime taken from the route's [`FreshnessPolicy`].
//! Hits past the policy's staleness threshold are still served immediately
//! while a background task fetches a replacement.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use asynccache::cache::{AsyncCache, MemoryStore, PolicyResolver};
//!
//! let policies = PolicyResolver::from_json_file("route-config.json")?;
//! let cache = AsyncCache::new(Arc::new(MemoryStore::new()), policies);
//! # Ok::<(), asynccache::config::ConfigError>(())
//! ```

use thiserror::Error;

mod capture;
mod engine;
mod key;
mod policy;
mod redis_store;
mod store;

pub use capture::CapturedResponse;
pub use engine::{AsyncCache, Freshness, Revalidation};
pub use key::CacheKey;
pub use policy::{FreshnessPolicy, PolicyResolver};
pub use redis_store::RedisStore;
pub use store::{CacheStore, MemoryStore, StoreError, StoreFuture};

/// Reason a background refresh did not update the store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("backend answered {status}; response not cached")]
    Uncacheable { status: u16 },
}
