//! Process configuration
//!
//! Settings come from the environment, with CLI flags taking precedence.
//! Only the remote source location is required; everything else has a
//! default.

use crate::error::{CacheError, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default cache time-to-live in seconds
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Default SQLite cache file
pub const DEFAULT_DB_PATH: &str = "cache.db";

/// Default HTTP bind address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration for the cache service
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the remote JSON source
    pub source_url: String,
    /// Path of the record endpoint on the remote source
    pub source_path: String,
    /// Location of the SQLite cache file
    pub database_path: PathBuf,
    /// Staleness threshold for background refreshes
    pub cache_ttl: Duration,
    /// HTTP listen address
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Resolve configuration from CLI overrides and the environment
    /// (`SOURCE_URL`, `SOURCE_PATH`, `CACHE_DB_PATH`, `CACHE_TTL_SECONDS`,
    /// `BIND_ADDR`).
    pub fn resolve(
        source_url: Option<String>,
        source_path: Option<String>,
        database_path: Option<PathBuf>,
        ttl_seconds: Option<u64>,
        bind_addr: Option<SocketAddr>,
    ) -> Result<Self> {
        let source_url = source_url
            .or_else(|| env::var("SOURCE_URL").ok())
            .ok_or_else(|| CacheError::Config("SOURCE_URL is not set".to_string()))?;
        let source_path = source_path
            .or_else(|| env::var("SOURCE_PATH").ok())
            .ok_or_else(|| CacheError::Config("SOURCE_PATH is not set".to_string()))?;

        let database_path = database_path
            .or_else(|| env::var("CACHE_DB_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let ttl_seconds = match ttl_seconds {
            Some(secs) => secs,
            None => match env::var("CACHE_TTL_SECONDS") {
                Ok(raw) => raw.parse().map_err(|_| {
                    CacheError::Config(format!("invalid CACHE_TTL_SECONDS value '{raw}'"))
                })?,
                Err(_) => DEFAULT_TTL_SECS,
            },
        };

        let bind_addr = match bind_addr {
            Some(addr) => addr,
            None => {
                let raw = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
                raw.parse()
                    .map_err(|_| CacheError::Config(format!("invalid BIND_ADDR value '{raw}'")))?
            }
        };

        Ok(Self {
            source_url: normalize_source_url(source_url),
            source_path,
            database_path,
            cache_ttl: Duration::from_secs(ttl_seconds),
            bind_addr,
        })
    }
}

/// Accept a bare host ("example.com:9000") or a full URL; bare hosts get an
/// http scheme.
fn normalize_source_url(raw: String) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw
    } else {
        format!("http://{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_with_overrides() {
        let config = Config::resolve(
            Some("example.com:9000".to_string()),
            Some("/records".to_string()),
            Some(PathBuf::from("/tmp/test-cache.db")),
            Some(60),
            Some("127.0.0.1:3000".parse().unwrap()),
        )
        .unwrap();

        assert_eq!(config.source_url, "http://example.com:9000");
        assert_eq!(config.source_path, "/records");
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.bind_addr.port(), 3000);
    }

    #[test]
    fn test_resolve_requires_source() {
        // Overrides bypass the environment entirely, so a missing source URL
        // is reported regardless of ambient env vars.
        let result = Config::resolve(
            None,
            Some("/records".to_string()),
            Some(PathBuf::from("x.db")),
            Some(1),
            Some("127.0.0.1:0".parse().unwrap()),
        );
        if env::var("SOURCE_URL").is_err() {
            assert!(matches!(result, Err(CacheError::Config(_))));
        }
    }

    #[test]
    fn test_normalize_source_url() {
        assert_eq!(
            normalize_source_url("example.com".to_string()),
            "http://example.com"
        );
        assert_eq!(
            normalize_source_url("https://example.com".to_string()),
            "https://example.com"
        );
    }
}
