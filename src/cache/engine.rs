//! The hit / miss / stale decision for each request.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::{CacheError, CacheKey, CacheStore, FreshnessPolicy, PolicyResolver};
use crate::background::BackgroundTasks;
use crate::context::Context;
use crate::http::{Response, StatusCode};
use crate::middleware::{Middleware, Next};

/// Marker placed in [`Context::extensions`] when the backend is being run by
/// a background refresh rather than on behalf of a waiting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revalidation;

/// Whether a cached entry can be served without a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

impl Freshness {
    /// Classifies an entry with `remaining` lifetime under `policy`.
    ///
    /// The entry's age is `policy.ttl - remaining`, which is only meaningful
    /// when the entry was written with `policy.ttl`. An entry is stale once
    /// its age is strictly greater than `policy.stale_after`.
    pub fn evaluate(policy: FreshnessPolicy, remaining: Duration) -> Self {
        let age = policy.ttl.saturating_sub(remaining);
        if age > policy.stale_after {
            Self::Stale
        } else {
            Self::Fresh
        }
    }
}

/// Stale-while-revalidate response cache.
///
/// Built once at startup from a store and a route policy table, then
/// installed as a [`Middleware`] in front of the backend. Clones share the
/// store, policies, and background task set.
///
/// For each request:
///
/// - **miss**: the backend runs while the client waits; its response is
///   forwarded verbatim and, if `200 OK`, stored with the route's TTL.
/// - **fresh hit**: the stored body is returned; the backend is not called.
/// - **stale hit**: the stored body is returned, the entry is re-written with
///   a TTL of `stale_after`, and the backend runs in a detached task that
///   replaces the entry when it finishes.
///
/// Store failures never reach the client: a failed read is a miss, a failed
/// TTL query counts as fresh, and failed writes are logged and dropped.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use asynccache::cache::{AsyncCache, MemoryStore, PolicyResolver};
/// use asynccache::middleware::Pipeline;
/// use asynccache::{Response, StatusCode};
///
/// let cache = AsyncCache::new(Arc::new(MemoryStore::new()), PolicyResolver::default());
/// let pipeline = Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok).body("slow") })
///     .layer(cache.clone());
/// ```
#[derive(Clone)]
pub struct AsyncCache {
    pub(super) store: Arc<dyn CacheStore>,
    policies: Arc<PolicyResolver>,
    pub(super) tasks: BackgroundTasks,
}

impl AsyncCache {
    pub fn new(store: Arc<dyn CacheStore>, policies: PolicyResolver) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
            tasks: BackgroundTasks::new(),
        }
    }

    pub fn policies(&self) -> &PolicyResolver {
        &self.policies
    }

    /// The detached cache writes and refreshes started by this cache.
    pub fn background(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Answers one request from the cache or from the rest of the pipeline.
    pub async fn serve(&self, ctx: Context, next: Next) -> Response {
        let key = CacheKey::for_request(ctx.request());
        let policy = self.policies.resolve(ctx.request().path());

        let Some(body) = self.lookup(&key).await else {
            debug!(key = %key, "cache miss");
            return self
                .fetch_and_cache(ctx, next, key, policy)
                .await
                .into_response();
        };

        match self.freshness(&key, policy).await {
            Freshness::Fresh => debug!(key = %key, "cache hit"),
            Freshness::Stale => self.revalidate(ctx, next, key, policy, body.clone()).await,
        }

        Response::new(StatusCode::Ok).body_bytes(body)
    }

    async fn lookup(&self, key: &CacheKey) -> Option<Bytes> {
        match self.store.get(key.as_str()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed; treating as miss");
                None
            }
        }
    }

    async fn freshness(&self, key: &CacheKey, policy: FreshnessPolicy) -> Freshness {
        match self.store.time_to_live(key.as_str()).await {
            Ok(Some(remaining)) => Freshness::evaluate(policy, remaining),
            // Expired since the read, or stored without expiry. A negative
            // remaining lifetime would read as stale and trigger a refresh;
            // here the next request takes the miss path instead.
            Ok(None) => Freshness::Fresh,
            Err(e) => {
                warn!(key = %key, error = %e, "cache ttl query failed; treating as fresh");
                Freshness::Fresh
            }
        }
    }

    // Re-arms the stale entry with a short TTL, then refreshes it off the request path.
    async fn revalidate(
        &self,
        mut ctx: Context,
        next: Next,
        key: CacheKey,
        policy: FreshnessPolicy,
        body: Bytes,
    ) {
        info!(key = %key, "cache entry stale; refreshing in background");

        if let Err(e) = self.store.set(key.as_str(), body, policy.stale_after).await {
            warn!(key = %key, error = %e, "failed to re-arm stale entry");
        }

        ctx.extensions_mut().insert(Revalidation);
        let cache = self.clone();
        let label = key.to_string();
        self.tasks.spawn("refresh", label, async move {
            let captured = cache.fetch_and_cache(ctx, next, key, policy).await;
            if captured.is_cacheable() {
                Ok(())
            } else {
                Err(CacheError::Uncacheable {
                    status: captured.status().as_u16(),
                })
            }
        });
    }
}

impl Middleware for AsyncCache {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let cache = self.clone();
        Box::pin(async move { cache.serve(ctx, next).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, StoreError, StoreFuture};
    use crate::http::Request;
    use crate::middleware::Pipeline;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const KEY: &str = "example.com/feed";

    fn request(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: example.com\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    // Wraps a MemoryStore and records every write.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryStore,
        writes: Mutex<Vec<(String, Bytes, Duration)>>,
    }

    impl RecordingStore {
        fn writes(&self) -> Vec<(String, Bytes, Duration)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl CacheStore for RecordingStore {
        fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Bytes>> {
            self.inner.get(key)
        }

        fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()> {
            self.writes
                .lock()
                .unwrap()
                .push((key.to_owned(), value.clone(), ttl));
            self.inner.set(key, value, ttl)
        }

        fn time_to_live<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<Duration>> {
            self.inner.time_to_live(key)
        }
    }

    // Serves a fixed entry but fails the chosen operations.
    struct FlakyStore {
        fail_get: bool,
        fail_ttl: bool,
        remaining: Duration,
    }

    impl CacheStore for FlakyStore {
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<Bytes>> {
            let fail = self.fail_get;
            Box::pin(async move {
                if fail {
                    Err(StoreError::Unavailable("connection refused".into()))
                } else {
                    Ok(Some(Bytes::from_static(b"cached")))
                }
            })
        }

        fn set<'a>(&'a self, _key: &'a str, _value: Bytes, _ttl: Duration) -> StoreFuture<'a, ()> {
            Box::pin(async { Err::<(), _>(StoreError::Unavailable("read-only".into())) })
        }

        fn time_to_live<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<Duration>> {
            let fail = self.fail_ttl;
            let remaining = self.remaining;
            Box::pin(async move {
                if fail {
                    Err(StoreError::Unavailable("timeout".into()))
                } else {
                    Ok(Some(remaining))
                }
            })
        }
    }

    struct Backend {
        calls: Arc<AtomicUsize>,
        revalidations: Arc<AtomicUsize>,
    }

    fn pipeline(
        store: Arc<dyn CacheStore>,
        status: StatusCode,
        body: &'static str,
    ) -> (Pipeline, AsyncCache, Backend) {
        let calls = Arc::new(AtomicUsize::new(0));
        let revalidations = Arc::new(AtomicUsize::new(0));
        let cache = AsyncCache::new(store, PolicyResolver::default());

        let (c, r) = (Arc::clone(&calls), Arc::clone(&revalidations));
        let pipeline = Pipeline::new(move |ctx: Context| {
            c.fetch_add(1, Ordering::SeqCst);
            if ctx.extensions().contains::<Revalidation>() {
                r.fetch_add(1, Ordering::SeqCst);
            }
            async move {
                Response::new(status)
                    .header("X-Backend", "origin")
                    .body(body)
            }
        })
        .layer(cache.clone());

        (
            pipeline,
            cache,
            Backend {
                calls,
                revalidations,
            },
        )
    }

    #[test]
    fn freshness_boundaries() {
        let policy = FreshnessPolicy::from_secs(600, 60);
        assert_eq!(
            Freshness::evaluate(policy, Duration::from_secs(600)),
            Freshness::Fresh
        );
        assert_eq!(
            Freshness::evaluate(policy, Duration::from_secs(540)),
            Freshness::Fresh
        );
        assert_eq!(
            Freshness::evaluate(policy, Duration::from_secs(539)),
            Freshness::Stale
        );
        assert_eq!(
            Freshness::evaluate(policy, Duration::from_secs(50)),
            Freshness::Stale
        );
        // Entries written with a longer TTL than the current policy count as new.
        assert_eq!(
            Freshness::evaluate(policy, Duration::from_secs(900)),
            Freshness::Fresh
        );
    }

    #[tokio::test]
    async fn miss_forwards_backend_response_and_stores_it() {
        let store = Arc::new(RecordingStore::default());
        let (pipeline, cache, backend) = pipeline(store.clone(), StatusCode::Ok, "fresh body");

        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.content(), b"fresh body");
        assert_eq!(res.headers().get("x-backend"), Some("origin"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        cache.background().wait_idle().await;
        assert_eq!(
            store.writes(),
            vec![(
                KEY.to_owned(),
                Bytes::from_static(b"fresh body"),
                Duration::from_secs(600)
            )]
        );
    }

    #[tokio::test]
    async fn error_responses_are_forwarded_but_never_stored() {
        let store = Arc::new(RecordingStore::default());
        let (pipeline, cache, backend) =
            pipeline(store.clone(), StatusCode::InternalServerError, "boom");

        let first = pipeline.handle(request("/feed")).await;
        assert_eq!(first.status(), StatusCode::InternalServerError);
        assert_eq!(first.content(), b"boom");
        cache.background().wait_idle().await;

        let second = pipeline.handle(request("/feed")).await;
        assert_eq!(second.status(), StatusCode::InternalServerError);
        cache.background().wait_idle().await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn fresh_hits_skip_backend_and_leave_store_untouched() {
        let store = Arc::new(RecordingStore::default());
        store
            .inner
            .set(KEY, Bytes::from_static(b"cached"), Duration::from_secs(600))
            .await
            .unwrap();
        let before = store.inner.time_to_live(KEY).await.unwrap().unwrap();
        let (pipeline, cache, backend) = pipeline(store.clone(), StatusCode::Ok, "new");

        for _ in 0..3 {
            let res = pipeline.handle(request("/feed")).await;
            assert_eq!(res.status(), StatusCode::Ok);
            assert_eq!(res.content(), b"cached");
        }
        cache.background().wait_idle().await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(store.writes().is_empty());
        let after = store.inner.time_to_live(KEY).await.unwrap().unwrap();
        assert!(after <= before);
        assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some(&b"cached"[..]));
    }

    #[tokio::test]
    async fn query_string_shares_the_entry() {
        let store = Arc::new(RecordingStore::default());
        let (pipeline, cache, backend) = pipeline(store.clone(), StatusCode::Ok, "body");

        pipeline.handle(request("/feed?page=1")).await;
        cache.background().wait_idle().await;
        let res = pipeline.handle(request("/feed?page=2")).await;

        assert_eq!(res.content(), b"body");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_hit_serves_old_body_and_refreshes_once() {
        let store = Arc::new(RecordingStore::default());
        // Written 550s ago under the default 600s/60s policy.
        store
            .inner
            .set(KEY, Bytes::from_static(b"old"), Duration::from_secs(50))
            .await
            .unwrap();
        let (pipeline, cache, backend) = pipeline(store.clone(), StatusCode::Ok, "new");

        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.content(), b"old");

        cache.background().wait_idle().await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.revalidations.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.writes(),
            vec![
                (
                    KEY.to_owned(),
                    Bytes::from_static(b"old"),
                    Duration::from_secs(60)
                ),
                (
                    KEY.to_owned(),
                    Bytes::from_static(b"new"),
                    Duration::from_secs(600)
                ),
            ]
        );

        let next = pipeline.handle(request("/feed")).await;
        assert_eq!(next.content(), b"new");
    }

    #[tokio::test]
    async fn stale_hit_does_not_wait_for_the_refresh() {
        let store = Arc::new(RecordingStore::default());
        store
            .inner
            .set(KEY, Bytes::from_static(b"old"), Duration::from_secs(50))
            .await
            .unwrap();
        let cache = AsyncCache::new(store.clone(), PolicyResolver::default());
        let pipeline = Pipeline::new(|_ctx| async {
            std::future::pending::<()>().await;
            Response::new(StatusCode::Ok).body("never")
        })
        .layer(cache.clone());

        let res = tokio::time::timeout(Duration::from_secs(1), pipeline.handle(request("/feed")))
            .await
            .expect("stale hit waited on the backend");
        assert_eq!(res.content(), b"old");
        assert_eq!(cache.background().in_flight(), 1);
        assert_eq!(store.writes().len(), 1);
    }

    #[tokio::test]
    async fn redirects_are_forwarded_verbatim_and_not_stored() {
        let store = Arc::new(RecordingStore::default());
        let (pipeline, cache, _backend) =
            pipeline(store.clone(), StatusCode::TemporaryRedirect, "moved");

        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.status(), StatusCode::TemporaryRedirect);
        assert_eq!(res.content(), b"moved");
        cache.background().wait_idle().await;
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_serving_rearmed_entry() {
        let store = Arc::new(RecordingStore::default());
        store
            .inner
            .set(KEY, Bytes::from_static(b"old"), Duration::from_secs(50))
            .await
            .unwrap();
        let (pipeline, cache, backend) =
            pipeline(store.clone(), StatusCode::ServiceUnavailable, "down");

        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.content(), b"old");
        cache.background().wait_idle().await;

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.writes().len(), 1);
        let remaining = store.inner.time_to_live(KEY).await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert_eq!(store.get(KEY).await.unwrap().as_deref(), Some(&b"old"[..]));
    }

    #[tokio::test]
    async fn read_failure_falls_through_to_backend() {
        let store = Arc::new(FlakyStore {
            fail_get: true,
            fail_ttl: false,
            remaining: Duration::from_secs(600),
        });
        let (pipeline, cache, backend) = pipeline(store, StatusCode::Ok, "from backend");

        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.content(), b"from backend");
        cache.background().wait_idle().await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ttl_failure_is_treated_as_fresh() {
        let store = Arc::new(FlakyStore {
            fail_get: false,
            fail_ttl: true,
            remaining: Duration::ZERO,
        });
        let (pipeline, cache, backend) = pipeline(store, StatusCode::Ok, "new");

        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.content(), b"cached");
        cache.background().wait_idle().await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn write_failures_do_not_reach_the_client() {
        let store = Arc::new(FlakyStore {
            fail_get: false,
            fail_ttl: false,
            remaining: Duration::from_secs(1),
        });
        let (pipeline, cache, backend) = pipeline(store, StatusCode::Ok, "new");

        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.content(), b"cached");
        cache.background().wait_idle().await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn route_policy_drives_staleness() {
        let store = Arc::new(RecordingStore::default());
        store
            .inner
            .set(KEY, Bytes::from_static(b"old"), Duration::from_secs(50))
            .await
            .unwrap();
        let policies =
            PolicyResolver::from_json_str(r#"{"/feed": {"ttl": 60, "stale": 30}}"#).unwrap();
        let cache = AsyncCache::new(store.clone(), policies);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let pipeline = Pipeline::new(move |_ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            async { Response::new(StatusCode::Ok).body("new") }
        })
        .layer(cache.clone());

        // Age is 10s under a 60s/30s policy: fresh, although the default would call it stale.
        let res = pipeline.handle(request("/feed")).await;
        assert_eq!(res.content(), b"old");
        cache.background().wait_idle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
