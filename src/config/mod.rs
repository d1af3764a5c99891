//! Process configuration from environment variables.
//!
//! | Variable       | Default              |
//! |----------------|----------------------|
//! | `LISTEN_ADDR`  | `0.0.0.0:8080`       |
//! | `ROUTE_CONFIG` | `route-config.json`  |
//! | `REDIS_HOST`   | `localhost`          |
//! | `REDIS_PORT`   | `6379`               |
//! | `REDIS_PASS`   | *(none)*             |
//! | `REDIS_DB`     | `0`                  |
//!
//! Unparsable numbers fall back to their defaults. The route file itself is
//! loaded by [`PolicyResolver::from_json_file`](crate::cache::PolicyResolver::from_json_file).

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid route config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Connection settings for the Redis store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 6379,
            password: None,
            db: 0,
        }
    }
}

impl RedisConfig {
    /// Connection URL in the form `redis://[:password@]host:port/db`.
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub listen_addr: String,
    pub route_config: PathBuf,
    pub redis: RedisConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_owned(),
            route_config: PathBuf::from("route-config.json"),
            redis: RedisConfig::default(),
        }
    }
}

impl Config {
    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let redis = RedisConfig {
            host: lookup("REDIS_HOST").unwrap_or(defaults.redis.host),
            port: lookup("REDIS_PORT")
                .and_then(|port| port.parse().ok())
                .unwrap_or(defaults.redis.port),
            password: lookup("REDIS_PASS").filter(|password| !password.is_empty()),
            db: lookup("REDIS_DB")
                .and_then(|db| db.parse().ok())
                .unwrap_or(defaults.redis.db),
        };

        Self {
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            route_config: lookup("ROUTE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or(defaults.route_config),
            redis,
        }
    }
}
