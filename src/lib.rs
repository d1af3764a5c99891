//! # asynccache
//!
//! Stale-while-revalidate HTTP response caching in front of a slow backend.
//!
//! Responses are stored in a shared key-value store (Redis, or memory for a
//! single process) under `host + path`. A hit is answered straight from the
//! store; once an entry is older than its route's staleness threshold it is
//! still served, and a background task fetches a replacement.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use asynccache::cache::{AsyncCache, PolicyResolver, RedisStore};
//! use asynccache::config::Config;
//! use asynccache::middleware::{LoggerMiddleware, Pipeline};
//! use asynccache::server::Server;
//! use asynccache::{Response, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let policies = PolicyResolver::from_json_file(&config.route_config)?;
//!     let store = RedisStore::connect(&config.redis).await?;
//!     let cache = AsyncCache::new(Arc::new(store), policies);
//!
//!     let pipeline = Arc::new(
//!         Pipeline::new(|_ctx| async { Response::new(StatusCode::Ok).body("slow data") })
//!             .layer(LoggerMiddleware)
//!             .layer(cache),
//!     );
//!
//!     Server::bind(&config.listen_addr)
//!         .await?
//!         .run(move |req| {
//!             let pipeline = Arc::clone(&pipeline);
//!             async move { pipeline.handle(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod server;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use server::{Server, ServerError};
