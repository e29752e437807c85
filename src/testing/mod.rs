//! Scripted sources, publishers and stores for unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{PriceQuote, SourceKind, TickerConfig, TickerSpec};
use crate::pricing::{FetchError, PriceSource};
use crate::publisher::{PresencePublisher, PublishError, PublisherFactory};
use crate::store::{MemoryStore, StoreError, TickerStore};

/// A valid submission with an explicit id and a per-id bot token
pub fn spec(id: &str, symbol: &str, source: SourceKind) -> TickerSpec {
    TickerSpec {
        id: Some(id.to_string()),
        name: None,
        symbol: symbol.to_string(),
        source,
        currency: None,
        url: match source {
            SourceKind::Custom => Some("http://127.0.0.1:9/price".to_string()),
            _ => None,
        },
        pointer: None,
        frequency: 0,
        bot_token: format!("token-{}", id),
        display_template: None,
        decimals: None,
    }
}

pub fn config(id: &str, symbol: &str) -> Arc<TickerConfig> {
    Arc::new(TickerConfig::from_spec(spec(id, symbol, SourceKind::Crypto)).unwrap())
}

/// Price source returning a settable price, counting calls per symbol
pub struct ScriptedSource {
    price: Mutex<Decimal>,
    fail_all: AtomicBool,
    panicking: AtomicBool,
    failing_symbols: Mutex<HashSet<String>>,
    delay: Duration,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn fixed(price: Decimal) -> Self {
        Self {
            price: Mutex::new(price),
            fail_all: AtomicBool::new(false),
            panicking: AtomicBool::new(false),
            failing_symbols: Mutex::new(HashSet::new()),
            delay: Duration::ZERO,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn failing() -> Self {
        let source = Self::fixed(Decimal::ZERO);
        source.set_failing(true);
        source
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_price(&self, price: Decimal) {
        *self.price.lock() = price;
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Make every fetch panic, as a bug in an adapter would
    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn fail_symbol(&self, symbol: &str) {
        self.failing_symbols.lock().insert(symbol.to_string());
    }

    pub fn calls(&self, symbol: &str) -> usize {
        self.calls.lock().get(symbol).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn fetch(&self, config: &TickerConfig) -> Result<PriceQuote, FetchError> {
        *self.calls.lock().entry(config.symbol.clone()).or_insert(0) += 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panicking.load(Ordering::SeqCst) {
            panic!("scripted panic fetching {}", config.symbol);
        }
        if self.fail_all.load(Ordering::SeqCst) || self.failing_symbols.lock().contains(&config.symbol) {
            return Err(FetchError::Status {
                status: 503,
                body: "scripted failure".to_string(),
            });
        }
        Ok(PriceQuote::new(*self.price.lock()))
    }
}

#[derive(Default)]
struct Recorder {
    connects: AtomicUsize,
    connect_failures: AtomicU32,
    fail_publish: AtomicBool,
    shutdowns: AtomicUsize,
    shutdown_delay: Mutex<Duration>,
    published: Mutex<HashMap<String, Vec<String>>>,
}

/// Publisher factory that records every display per ticker id
#[derive(Clone, Default)]
pub struct RecordingFactory {
    recorder: Arc<Recorder>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connect attempts
    pub fn fail_connects(&self, n: u32) {
        self.recorder.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.recorder.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make publisher shutdown hang for `delay`
    pub fn set_shutdown_delay(&self, delay: Duration) {
        *self.recorder.shutdown_delay.lock() = delay;
    }

    pub fn connects(&self) -> usize {
        self.recorder.connects.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.recorder.shutdowns.load(Ordering::SeqCst)
    }

    pub fn published(&self, id: &str) -> Vec<String> {
        self.recorder.published.lock().get(id).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl PublisherFactory for RecordingFactory {
    async fn connect(&self, config: &TickerConfig) -> Result<Box<dyn PresencePublisher>, PublishError> {
        self.recorder.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.recorder.connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.recorder.connect_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(PublishError::Connect("scripted connect failure".to_string()));
        }
        Ok(Box::new(RecordingPublisher {
            id: config.id.clone(),
            recorder: self.recorder.clone(),
        }))
    }
}

pub struct RecordingPublisher {
    id: String,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl PresencePublisher for RecordingPublisher {
    async fn publish(&self, display: &str) -> Result<(), PublishError> {
        if self.recorder.fail_publish.load(Ordering::SeqCst) {
            return Err(PublishError::Status {
                status: 502,
                body: "scripted failure".to_string(),
            });
        }
        self.recorder
            .published
            .lock()
            .entry(self.id.clone())
            .or_default()
            .push(display.to_string());
        Ok(())
    }

    async fn shutdown(&self) {
        let delay = *self.recorder.shutdown_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.recorder.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Memory store whose writes can be made to fail
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_saves: AtomicBool,
    fail_deletes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TickerStore for FailingStore {
    async fn save_or_replace(&self, id: &str, spec: &TickerSpec) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scripted save failure".to_string()));
        }
        self.inner.save_or_replace(id, spec).await
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("scripted delete failure".to_string()));
        }
        self.inner.delete(id).await
    }

    async fn get(&self, id: &str) -> Result<Option<TickerSpec>, StoreError> {
        self.inner.get(id).await
    }

    async fn load_all(&self) -> Result<Vec<(String, TickerSpec)>, StoreError> {
        self.inner.load_all().await
    }
}
