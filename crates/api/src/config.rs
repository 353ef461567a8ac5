//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use change_feed::FeedConfig;
use domain::RuntimeConfig;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string (unset: in-memory store)
/// - `ASK_TIMEOUT_MS`, `PERSIST_TIMEOUT_MS` (default: `5000` each)
/// - `PASSIVATION_TIMEOUT_SECS` (default: `120`)
/// - `SNAPSHOT_INTERVAL` (default: `100`, `0` disables snapshots)
/// - `FEED_POLL_INTERVAL_MS` (default: `100`), `FEED_BATCH_SIZE` (default: `128`)
/// - `FEED_RETRY_MAX_DELAY_MS`: longest wait before the feed producer restarts
///   (default: `10000`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub runtime: RuntimeConfig,
    pub feed: FeedConfig,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Values that fail to parse fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.parse::<u64>().ok());

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(lookup("PORT"), defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            runtime: RuntimeConfig {
                ask_timeout: parsed("ASK_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.runtime.ask_timeout),
                persist_timeout: parsed("PERSIST_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.runtime.persist_timeout),
                passivation_timeout: parsed("PASSIVATION_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.runtime.passivation_timeout),
                snapshot_interval: parsed("SNAPSHOT_INTERVAL")
                    .unwrap_or(defaults.runtime.snapshot_interval),
                ..defaults.runtime
            },
            feed: FeedConfig {
                poll_interval: parsed("FEED_POLL_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.feed.poll_interval),
                batch_size: parse_or(lookup("FEED_BATCH_SIZE"), defaults.feed.batch_size),
                retry_max_delay: parsed("FEED_RETRY_MAX_DELAY_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.feed.retry_max_delay),
                ..defaults.feed
            },
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            runtime: RuntimeConfig::default(),
            feed: FeedConfig::default(),
        }
    }
}
