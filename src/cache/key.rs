//! Cache keys derived from a request's host and path.

use std::fmt;

use crate::Request;

/// Store key for a request: its `Host` header followed by its path.
///
/// Method, query string, and every other header are ignored, so
/// `GET /a?x=1` and `POST /a` on the same host share one entry. No
/// normalization is applied; keys are case-sensitive.
///
/// # Examples
///
/// ```
/// use asynccache::cache::CacheKey;
///
/// assert_eq!(CacheKey::new("example.com", "/feed").as_str(), "example.com/feed");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(host: &str, path: &str) -> Self {
        let mut key = String::with_capacity(host.len() + path.len());
        key.push_str(host);
        key.push_str(path);
        Self(key)
    }

    pub fn for_request(request: &Request) -> Self {
        Self::new(request.host(), request.path())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_for(raw: &str) -> CacheKey {
        CacheKey::for_request(&Request::parse(raw.as_bytes()).unwrap().0)
    }

    #[test]
    fn ignores_query_method_and_headers() {
        let a = key_for("GET /items?page=1 HTTP/1.1\r\nHost: shop\r\n\r\n");
        let b = key_for("POST /items HTTP/1.1\r\nHost: shop\r\nAccept: text/html\r\n\r\n");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "shop/items");
    }

    #[test]
    fn host_and_case_matter() {
        let a = key_for("GET /items HTTP/1.1\r\nHost: shop\r\n\r\n");
        let b = key_for("GET /items HTTP/1.1\r\nHost: blog\r\n\r\n");
        let c = key_for("GET /Items HTTP/1.1\r\nHost: shop\r\n\r\n");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn missing_host_uses_path_alone() {
        assert_eq!(key_for("GET /x HTTP/1.0\r\n\r\n").as_str(), "/x");
    }
}
