//! TTL cache in front of a [`PriceSource`].
//!
//! Keys are `(source, symbol)`, so every ticker quoting the same instrument
//! shares one upstream request per TTL window. Concurrent misses on a key
//! are coalesced behind a per-key lock. The backend is best effort: any
//! backend failure falls through to the wrapped source.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use super::{FetchError, PriceSource};
use crate::config::CacheConfig;
use crate::models::{PriceQuote, TickerConfig};

/// How long a failed redis connect suppresses further attempts
const RECONNECT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("cache operation timed out")]
    Timeout,
}

/// Storage behind the price cache
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<PriceQuote>, CacheError>;

    async fn put(&self, key: &str, quote: &PriceQuote, ttl: Duration) -> Result<(), CacheError>;

    fn name(&self) -> &'static str;
}

/// In-process backend
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, (PriceQuote, Instant)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<PriceQuote>, CacheError> {
        let hit = match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => Some(entry.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= Instant::now());
        }
        Ok(hit)
    }

    async fn put(&self, key: &str, quote: &PriceQuote, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (quote.clone(), Instant::now() + ttl));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Redis backend. Connects lazily, so an unreachable server at startup only
/// costs cache hits until it comes back.
pub struct RedisBackend {
    client: redis::Client,
    connection: Mutex<Option<ConnectionManager>>,
    retry_after: parking_lot::Mutex<Option<Instant>>,
    timeout: Duration,
}

impl RedisBackend {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.redis_connection()?)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            retry_after: parking_lot::Mutex::new(None),
            timeout: config.timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        if let Some(until) = *self.retry_after.lock() {
            if Instant::now() < until {
                return Err(CacheError::Unavailable("reconnect cooling down".to_string()));
            }
        }

        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let connected = tokio::time::timeout(self.timeout, self.client.get_connection_manager())
            .await
            .map_err(|_| CacheError::Timeout)
            .and_then(|r| r.map_err(CacheError::from));

        match connected {
            Ok(conn) => {
                tracing::info!("Connected to redis quote cache");
                *self.retry_after.lock() = None;
                *guard = Some(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                *self.retry_after.lock() = Some(Instant::now() + RECONNECT_COOLDOWN);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<PriceQuote>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = tokio::time::timeout(self.timeout, conn.get(key))
            .await
            .map_err(|_| CacheError::Timeout)??;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, quote: &PriceQuote, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(quote)?;
        let seconds = ttl.as_secs().max(1);
        tokio::time::timeout(self.timeout, conn.set_ex::<_, _, ()>(key, json, seconds))
            .await
            .map_err(|_| CacheError::Timeout)??;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Counters for cache effectiveness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub backend_errors: u64,
}

/// A [`PriceSource`] that memoizes another one
pub struct PriceCache {
    inner: Arc<dyn PriceSource>,
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    backend_errors: AtomicU64,
}

impl PriceCache {
    pub fn new(inner: Arc<dyn PriceSource>, backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            inner,
            backend,
            ttl,
            inflight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
        }
    }

    pub fn key(config: &TickerConfig) -> String {
        format!(
            "ticker:quote:{}:{}",
            config.source.cache_discriminator(),
            config.symbol.to_uppercase()
        )
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
        }
    }

    async fn lookup(&self, key: &str) -> Option<PriceQuote> {
        match self.backend.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                self.backend_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(backend = self.backend.name(), key = %key, "Quote cache read failed: {}", e);
                None
            }
        }
    }

    async fn store(&self, key: &str, quote: &PriceQuote) {
        if let Err(e) = self.backend.put(key, quote, self.ttl).await {
            self.backend_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(backend = self.backend.name(), key = %key, "Quote cache write failed: {}", e);
        }
    }
}

#[async_trait]
impl PriceSource for PriceCache {
    async fn fetch(&self, config: &TickerConfig) -> Result<PriceQuote, FetchError> {
        let key = Self::key(config);

        let lock = self.inflight.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;

            if let Some(quote) = self.lookup(&key).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Quote cache hit");
                Ok(quote)
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let fetched = self.inner.fetch(config).await;
                if let Ok(quote) = &fetched {
                    self.store(&key, quote).await;
                }
                fetched
            }
        };

        // Drop the per-key lock once nobody else is waiting on it
        self.inflight
            .remove_if(&key, |_, m| Arc::strong_count(m) <= 2 && Arc::ptr_eq(m, &lock));

        result
    }
}
