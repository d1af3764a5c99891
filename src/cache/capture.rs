//! Running the backend and holding on to what it produced.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::engine::AsyncCache;
use super::{CacheKey, FreshnessPolicy};
use crate::context::Context;
use crate::http::{Headers, Response, StatusCode};
use crate::middleware::Next;

/// A fully buffered backend response.
///
/// Nothing reaches the client until the caller turns this back into a
/// [`Response`], so the same bytes can be stored and forwarded.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl CapturedResponse {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Only `200 OK` responses are ever written to the store.
    pub fn is_cacheable(&self) -> bool {
        self.status == StatusCode::Ok
    }

    /// Rebuilds a response carrying the captured status, headers, and body.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.status);
        for (name, value) in self.headers.iter() {
            response.add_header(name, value);
        }
        response.body_bytes(self.body)
    }
}

impl From<Response> for CapturedResponse {
    fn from(response: Response) -> Self {
        let (status, headers, body) = response.into_parts();
        Self {
            status,
            headers,
            body,
        }
    }
}

impl AsyncCache {
    /// Drives the rest of the pipeline to completion and captures the result.
    ///
    /// A `200 OK` body is written under `key` with `policy.ttl` by a detached
    /// task; this call does not wait for the write or observe its failure.
    pub(crate) async fn fetch_and_cache(
        &self,
        ctx: Context,
        next: Next,
        key: CacheKey,
        policy: FreshnessPolicy,
    ) -> CapturedResponse {
        let captured = CapturedResponse::from(next.run(ctx).await);

        if captured.is_cacheable() {
            let store = Arc::clone(&self.store);
            let body = captured.body.clone();
            let label = key.to_string();
            self.tasks.spawn("cache-write", label, async move {
                store.set(key.as_str(), body, policy.ttl).await
            });
        } else {
            debug!(key = %key, status = captured.status.as_u16(), "response not cacheable");
        }

        captured
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ok_is_cacheable() {
        let ok = CapturedResponse::from(Response::new(StatusCode::Ok).body("x"));
        let created = CapturedResponse::from(Response::new(StatusCode::Created).body("x"));
        let error = CapturedResponse::from(Response::new(StatusCode::InternalServerError));
        assert!(ok.is_cacheable());
        assert!(!created.is_cacheable());
        assert!(!error.is_cacheable());
    }

    #[test]
    fn replay_keeps_status_headers_and_body() {
        let original = Response::new(StatusCode::NotFound)
            .header("X-Backend", "slow")
            .header("Content-Type", "application/json")
            .body("{}");
        let captured = CapturedResponse::from(original);
        assert_eq!(captured.headers().len(), 2);

        let replayed = captured.into_response();
        assert_eq!(replayed.status(), StatusCode::NotFound);
        assert_eq!(replayed.headers().get("x-backend"), Some("slow"));
        assert_eq!(replayed.headers().get("content-type"), Some("application/json"));
        assert_eq!(replayed.content(), b"{}");
    }
}
