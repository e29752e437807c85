use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{CacheConfig, ManagerConfig};

/// Command line flags. Every flag can also be set through the environment
/// variable named next to it.
#[derive(Debug, Clone, Parser)]
#[command(name = "ticker-manager")]
#[command(about = "Publishes live stock and crypto prices as bot presence", long_about = None)]
#[command(version)]
pub struct Args {
    /// Log level: 0 = info, 1 or higher = debug. RUST_LOG overrides it.
    #[arg(long, env = "LOGLEVEL", default_value_t = 0)]
    pub log_level: u8,

    /// address:port to bind the control API to
    #[arg(long, env = "ADDRESS", default_value = "0.0.0.0:8080")]
    pub address: String,

    /// Directory to store tickers in; empty keeps them in memory only
    #[arg(long, env = "DB", default_value = "")]
    pub db: String,

    /// Minimum seconds between updates for every ticker; 0 = none
    #[arg(long, env = "FREQUENCY", default_value_t = 0)]
    pub frequency: u64,

    /// Cache quotes in Redis
    #[arg(long, env = "CACHE")]
    pub cache: bool,

    #[arg(long, env = "REDISADDRESS", default_value = "localhost:6379")]
    pub redis_address: String,

    #[arg(long, env = "REDISPASSWORD")]
    pub redis_password: Option<String>,

    #[arg(long, env = "REDISDB", default_value_t = 0)]
    pub redis_db: i64,

    /// Seconds a cached quote stays fresh
    #[arg(long, env = "CACHETTL", default_value_t = 30)]
    pub cache_ttl: u64,

    /// Periodically reconcile running tickers with the store
    #[arg(long, env = "MANAGED")]
    pub managed: bool,

    /// Seconds between managed mode reconcile passes
    #[arg(long, env = "RECONCILEINTERVAL", default_value_t = 60)]
    pub reconcile_interval: u64,

    /// Consecutive failures before a ticker stops; 0 = never stop
    #[arg(long, env = "RETRYCEILING", default_value_t = 0)]
    pub retry_ceiling: u32,

    /// Seconds to wait for a stopping worker before aborting it
    #[arg(long, env = "DRAINTIMEOUT", default_value_t = 5)]
    pub drain_timeout: u64,

    /// Ticker definitions in here are submitted at startup. Files with
    /// `.sample.` in their name are skipped.
    #[arg(long, env = "TICKERFOLDER", default_value = "./discord-bot-configs")]
    pub ticker_folder: PathBuf,
}

impl Args {
    pub fn store_path(&self) -> Option<PathBuf> {
        let db = self.db.trim();
        if db.is_empty() {
            None
        } else {
            Some(PathBuf::from(db))
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            store_path: self.store_path(),
            default_frequency: Duration::from_secs(self.frequency),
            retry_ceiling: self.retry_ceiling,
            drain_timeout: Duration::from_secs(self.drain_timeout),
            managed: self.managed,
            reconcile_interval: Duration::from_secs(self.reconcile_interval.max(1)),
            ..ManagerConfig::default()
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache,
            redis_address: self.redis_address.clone(),
            redis_password: self.redis_password.clone().filter(|p| !p.is_empty()),
            redis_db: self.redis_db,
            ttl: Duration::from_secs(self.cache_ttl),
            ..CacheConfig::default()
        }
    }

    /// Filter used when RUST_LOG is not set
    pub fn log_filter(&self) -> &'static str {
        match self.log_level {
            0 => "ticker_manager=info,axum=info",
            _ => "ticker_manager=debug,axum=debug",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["ticker-manager"]).unwrap();
        assert_eq!(args.address, "0.0.0.0:8080");
        assert!(args.store_path().is_none());

        let config = args.manager_config();
        assert_eq!(config.default_frequency, Duration::ZERO);
        assert_eq!(config.fallback_frequency, Duration::from_secs(60));
        assert_eq!(config.retry_ceiling, 0);
        assert!(!config.managed);

        let cache = args.cache_config();
        assert!(!cache.enabled);
        assert_eq!(cache.redis_address, "localhost:6379");
        assert_eq!(args.log_filter(), "ticker_manager=info,axum=info");
    }

    #[test]
    fn test_flags() {
        let args = Args::try_parse_from([
            "ticker-manager",
            "--db",
            "/var/lib/tickers",
            "--frequency",
            "30",
            "--cache",
            "--redis-password",
            "hunter2",
            "--redis-db",
            "3",
            "--managed",
            "--retry-ceiling",
            "10",
            "--log-level",
            "1",
        ])
        .unwrap();

        let config = args.manager_config();
        assert_eq!(config.store_path, Some(PathBuf::from("/var/lib/tickers")));
        assert_eq!(config.default_frequency, Duration::from_secs(30));
        assert_eq!(config.retry_ceiling, 10);
        assert!(config.managed);

        let cache = args.cache_config();
        assert!(cache.enabled);
        let info = cache.redis_connection().unwrap();
        assert_eq!(info.redis.password.as_deref(), Some("hunter2"));
        assert_eq!(info.redis.db, 3);
        assert_eq!(args.log_filter(), "ticker_manager=debug,axum=debug");
    }
}
