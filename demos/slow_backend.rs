//! A backend that takes three seconds per request, fronted by the cache.
//!
//! ```text
//! REDIS_HOST=localhost cargo run --example slow_backend
//! curl -H 'Host: demo' localhost:8080/news
//! ```
//!
//! Falls back to an in-process store when Redis is unreachable.

use std::sync::Arc;
use std::time::Duration;

use asynccache::cache::{AsyncCache, CacheStore, MemoryStore, PolicyResolver, RedisStore, Revalidation};
use asynccache::config::Config;
use asynccache::context::Context;
use asynccache::middleware::{LoggerMiddleware, Pipeline};
use asynccache::{Response, Server, StatusCode};
use tracing_subscriber::EnvFilter;

async fn slow_handler(ctx: Context) -> Response {
    let path = ctx.request().path().to_owned();
    let refresh = ctx.extensions().contains::<Revalidation>();
    tracing::info!(path = %path, refresh, "retrieving slow data");
    tokio::time::sleep(Duration::from_secs(3)).await;
    tracing::info!(path = %path, "done");
    Response::new(StatusCode::Ok).body(format!(
        "Response for route: {}",
        path.strip_prefix('/').unwrap_or(&path)
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let policies = PolicyResolver::from_json_file(&config.route_config)?;
    tracing::info!(routes = policies.len(), "route policies loaded");

    let store: Arc<dyn CacheStore> = match RedisStore::connect(&config.redis).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(error = %e, "redis unavailable; using in-process store");
            Arc::new(MemoryStore::new())
        }
    };
    let cache = AsyncCache::new(store, policies);

    let pipeline = Arc::new(
        Pipeline::new(slow_handler)
            .layer(LoggerMiddleware)
            .layer(cache.clone()),
    );

    let server = Server::bind(&config.listen_addr).await?;
    server
        .run_until(
            move |req| {
                let pipeline = Arc::clone(&pipeline);
                async move { pipeline.handle(req).await }
            },
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
        )
        .await?;

    tracing::info!(
        in_flight = cache.background().in_flight(),
        "waiting for background refreshes"
    );
    cache.background().wait_idle().await;
    Ok(())
}
