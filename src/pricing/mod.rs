//! Price sources
//!
//! - `yahoo` - stock quotes
//! - `coingecko` - crypto quotes
//! - `custom` - any JSON endpoint plus a pointer to the price
//! - `router` - dispatches a ticker to the source for its kind
//! - `cache` - TTL cache shared by all tickers

pub mod cache;
pub mod coingecko;
pub mod custom;
pub mod router;
pub mod yahoo;

use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::models::{PriceQuote, TickerConfig};

pub use cache::{CacheBackend, CacheError, CacheStats, MemoryBackend, PriceCache, RedisBackend};
pub use coingecko::CoinGeckoSource;
pub use custom::CustomSource;
pub use router::SourceRouter;
pub use yahoo::YahooSource;

/// Upper bound on a single upstream quote request
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors from fetching a price. All of them are retried by the worker.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("price request timed out")]
    Timeout,

    #[error("rate limited by price source")]
    RateLimited { retry_after: Option<Duration> },

    #[error("price source returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Parse(e.to_string())
        } else {
            FetchError::Http(e)
        }
    }
}

/// Fetches the current price for a ticker
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, config: &TickerConfig) -> Result<PriceQuote, FetchError>;
}

/// HTTP client shared by the quote adapters
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ticker-manager/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Turn a non-success response into a [`FetchError`]
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(FetchError::RateLimited { retry_after });
    }

    let body = response.text().await.unwrap_or_default();
    Err(FetchError::Status {
        status: status.as_u16(),
        body: body.chars().take(200).collect(),
    })
}

/// Read a price out of a JSON number or numeric string
pub(crate) fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
                .or_else(|| n.as_f64().and_then(Decimal::from_f64))
        }
        serde_json::Value::String(s) => {
            let text = s.trim().replace(',', "");
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .ok()
        }
        _ => None,
    }
}
