use redis::IntoConnectionInfo;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_REDIS_PORT: u16 = 6379;

/// Process-wide settings for the ticker manager and its workers.
///
/// Built once at bootstrap and passed by reference into the manager, which
/// hands each worker the parts it needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Directory for persisted tickers. `None` keeps tickers in memory only.
    #[serde(default)]
    pub store_path: Option<PathBuf>,

    /// Default polling interval. A ticker polls at the larger of this and
    /// its own frequency.
    #[serde(default, with = "duration_secs")]
    pub default_frequency: Duration,

    /// Interval used when both the ticker and the process leave frequency at 0
    #[serde(default = "default_fallback_frequency", with = "duration_secs")]
    pub fallback_frequency: Duration,

    /// Consecutive failures after which a worker stops (0 = never)
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// Error backoff for running workers
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Backoff for the queue that retries workers which failed to start
    #[serde(default = "default_start_backoff")]
    pub start_backoff: BackoffConfig,

    /// Time allowed for a publisher to connect when a worker starts
    #[serde(default = "default_start_timeout", with = "duration_secs")]
    pub start_timeout: Duration,

    /// Time allowed for a cancelled worker to drain before it is aborted
    #[serde(default = "default_drain_timeout", with = "duration_secs")]
    pub drain_timeout: Duration,

    /// Keep the store and bot displays continually reconciled
    #[serde(default)]
    pub managed: bool,

    /// How often managed mode reconciles
    #[serde(default = "default_reconcile_interval", with = "duration_secs")]
    pub reconcile_interval: Duration,
}

/// Exponential backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    /// Random jitter as a fraction of the delay (0.0 - 1.0)
    #[serde(default)]
    pub jitter: f64,
}

/// Quote cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Redis address as host:port
    #[serde(default = "default_redis_address")]
    pub redis_address: String,

    #[serde(default)]
    pub redis_password: Option<String>,

    #[serde(default)]
    pub redis_db: i64,

    /// How long a cached quote stays fresh
    #[serde(default = "default_cache_ttl", with = "duration_secs")]
    pub ttl: Duration,

    /// Upper bound on any single cache round trip
    #[serde(default = "default_cache_timeout", with = "duration_secs")]
    pub timeout: Duration,
}

impl CacheConfig {
    /// Connection parameters for the redis client. Built field by field so
    /// passwords are never parsed as part of a URL.
    pub fn redis_connection(&self) -> redis::RedisResult<redis::ConnectionInfo> {
        let (host, port) = match self.redis_address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    redis::RedisError::from((
                        redis::ErrorKind::InvalidClientConfig,
                        "redis address port is not a number",
                    ))
                })?;
                (host.trim_start_matches('[').trim_end_matches(']'), port)
            }
            None => (self.redis_address.as_str(), DEFAULT_REDIS_PORT),
        };
        if host.is_empty() {
            return Err(redis::RedisError::from((
                redis::ErrorKind::InvalidClientConfig,
                "redis address has no host",
            )));
        }

        let mut info = (host.to_string(), port).into_connection_info()?;
        info.redis.db = self.redis_db;
        info.redis.password = self.redis_password.clone().filter(|p| !p.is_empty());
        Ok(info)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            default_frequency: Duration::ZERO,
            fallback_frequency: default_fallback_frequency(),
            retry_ceiling: default_retry_ceiling(),
            backoff: BackoffConfig::default(),
            start_backoff: default_start_backoff(),
            start_timeout: default_start_timeout(),
            drain_timeout: default_drain_timeout(),
            managed: false,
            reconcile_interval: default_reconcile_interval(),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_backoff_multiplier(),
            jitter: 0.0,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_address: default_redis_address(),
            redis_password: None,
            redis_db: 0,
            ttl: default_cache_ttl(),
            timeout: default_cache_timeout(),
        }
    }
}

// Default value functions for serde
fn default_fallback_frequency() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_ceiling() -> u32 {
    0
}

fn default_start_backoff() -> BackoffConfig {
    BackoffConfig {
        initial_delay_ms: 5_000,
        max_delay_ms: 300_000,
        multiplier: 2.0,
        jitter: 0.1,
    }
}

fn default_start_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_reconcile_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    300_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_redis_address() -> String {
    "localhost:6379".to_string()
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_cache_timeout() -> Duration {
    Duration::from_secs(2)
}

/// Durations as whole seconds in serialized config
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ManagerConfig::default();
        assert_eq!(config.default_frequency, Duration::ZERO);
        assert_eq!(config.fallback_frequency, Duration::from_secs(60));
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_ceiling, 0);
        assert!(!config.managed);
    }

    #[test]
    fn test_backoff_defaults() {
        let config = BackoffConfig::default();
        assert_eq!(config.initial_delay_ms, 1000);
        assert_eq!(config.max_delay_ms, 300_000);
        assert_eq!(config.multiplier, 2.0);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"managed": true, "drain_timeout": 9}"#).unwrap();
        assert!(config.managed);
        assert_eq!(config.drain_timeout, Duration::from_secs(9));
        assert_eq!(config.reconcile_interval, Duration::from_secs(60));
    }

    fn tcp_addr(info: &redis::ConnectionInfo) -> Option<(String, u16)> {
        match &info.addr {
            redis::ConnectionAddr::Tcp(host, port) => Some((host.clone(), *port)),
            _ => None,
        }
    }

    #[test]
    fn test_redis_connection() {
        let mut config = CacheConfig::default();
        let info = config.redis_connection().unwrap();
        assert_eq!(tcp_addr(&info), Some(("localhost".to_string(), 6379)));
        assert_eq!(info.redis.db, 0);
        assert!(info.redis.password.is_none());

        config.redis_address = "cache.internal".to_string();
        config.redis_password = Some("p@ss/w:rd#1".to_string());
        config.redis_db = 2;
        let info = config.redis_connection().unwrap();
        assert_eq!(tcp_addr(&info), Some(("cache.internal".to_string(), 6379)));
        assert_eq!(info.redis.db, 2);
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w:rd#1"));

        config.redis_address = "localhost:redis".to_string();
        assert!(config.redis_connection().is_err());
    }
}
