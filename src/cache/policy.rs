//! Per-route freshness policies.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::config::ConfigError;

/// How long a route's responses live in the store and when they turn stale.
///
/// A response younger than `stale_after` is served as-is; an older one is
/// still served but triggers a background refresh. The store drops it
/// entirely once `ttl` has elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub ttl: Duration,
    pub stale_after: Duration,
}

impl FreshnessPolicy {
    /// Applied to every path without an explicit entry.
    pub const DEFAULT: Self = Self::from_secs(600, 60);

    pub const fn from_secs(ttl: u64, stale_after: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl),
            stale_after: Duration::from_secs(stale_after),
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

// On-disk shape of one route entry: `{"ttl": 600, "stale": 60}`.
#[derive(Debug, Deserialize)]
struct RouteEntry {
    ttl: u64,
    stale: u64,
}

/// Resolves a request path to its [`FreshnessPolicy`].
///
/// Matching is by exact path only; there is no prefix or wildcard support.
///
/// # Examples
///
/// ```
/// use asynccache::cache::{FreshnessPolicy, PolicyResolver};
///
/// let policies = PolicyResolver::from_json_str(r#"{"/news": {"ttl": 30, "stale": 5}}"#).unwrap();
/// assert_eq!(policies.resolve("/news"), FreshnessPolicy::from_secs(30, 5));
/// assert_eq!(policies.resolve("/news/"), FreshnessPolicy::DEFAULT);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PolicyResolver {
    routes: HashMap<String, FreshnessPolicy>,
    fallback: FreshnessPolicy,
}

impl PolicyResolver {
    pub fn new(routes: HashMap<String, FreshnessPolicy>) -> Self {
        for (path, policy) in &routes {
            if policy.stale_after >= policy.ttl {
                warn!(
                    path = %path,
                    ttl = ?policy.ttl,
                    stale_after = ?policy.stale_after,
                    "stale threshold is not below ttl; every hit on this route will refresh"
                );
            }
        }
        Self {
            routes,
            fallback: FreshnessPolicy::DEFAULT,
        }
    }

    /// Parses a route table of the form `{"/path": {"ttl": secs, "stale": secs}}`.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let entries: HashMap<String, RouteEntry> = serde_json::from_str(json)?;
        let routes = entries
            .into_iter()
            .map(|(path, entry)| (path, FreshnessPolicy::from_secs(entry.ttl, entry.stale)))
            .collect();
        Ok(Self::new(routes))
    }

    /// Reads and parses a route table file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn resolve(&self, path: &str) -> FreshnessPolicy {
        self.routes.get(path).copied().unwrap_or(self.fallback)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_path_gets_default() {
        let policies = PolicyResolver::default();
        assert_eq!(
            policies.resolve("/unknown"),
            FreshnessPolicy {
                ttl: Duration::from_secs(600),
                stale_after: Duration::from_secs(60),
            }
        );
    }

    #[test]
    fn exact_match_only() {
        let policies =
            PolicyResolver::from_json_str(r#"{"/a": {"ttl": 10, "stale": 2}}"#).unwrap();
        assert_eq!(policies.len(), 1);
        assert_eq!(policies.resolve("/a"), FreshnessPolicy::from_secs(10, 2));
        assert_eq!(policies.resolve("/a/b"), FreshnessPolicy::DEFAULT);
        assert_eq!(policies.resolve("/A"), FreshnessPolicy::DEFAULT);
    }

    #[test]
    fn inverted_policy_is_accepted() {
        let policies =
            PolicyResolver::from_json_str(r#"{"/x": {"ttl": 5, "stale": 50}}"#).unwrap();
        assert_eq!(policies.resolve("/x"), FreshnessPolicy::from_secs(5, 50));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = PolicyResolver::from_json_str(r#"{"/a": {"ttl": "ten"}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = PolicyResolver::from_json_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
