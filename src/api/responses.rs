use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::manager::TickerCounts;
use crate::models::{PriceSourceSpec, SourceKind, TickerConfig, TickerState, TickerStatus};

/// Response after creating a ticker
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateTickerResponse {
    #[schema(example = "btc-usd")]
    pub id: String,
}

/// Ticker definition as reported by the API. The bot token is never echoed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TickerConfigView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[schema(example = "BTC")]
    pub symbol: String,
    pub source: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    /// Seconds between updates; 0 uses the process default
    pub frequency: u64,
    #[schema(example = "{symbol} {price}")]
    pub display_template: String,
    pub decimals: u32,
}

/// Last known state of a ticker
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TickerStateResponse {
    pub id: String,
    pub status: TickerStatus,
    pub config: TickerConfigView,
    #[schema(value_type = Option<String>, example = "42000.50")]
    pub last_price: Option<Decimal>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_display: Option<String>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

/// Service health
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    pub version: String,
    pub managed: bool,
    pub tickers: usize,
    pub running: usize,
    pub backing_off: usize,
    pub stopped: usize,
    pub timestamp: DateTime<Utc>,
}

/// Error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl From<&TickerConfig> for TickerConfigView {
    fn from(config: &TickerConfig) -> Self {
        let (currency, url, pointer) = match &config.source {
            PriceSourceSpec::Stock => (None, None, None),
            PriceSourceSpec::Crypto { currency } => (Some(currency.clone()), None, None),
            PriceSourceSpec::Custom { url, pointer } => (None, Some(url.clone()), Some(pointer.clone())),
        };

        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            symbol: config.symbol.clone(),
            source: config.source.kind(),
            currency,
            url,
            pointer,
            frequency: config.frequency,
            display_template: config.template.as_str().to_string(),
            decimals: config.decimals,
        }
    }
}

impl From<TickerState> for TickerStateResponse {
    fn from(state: TickerState) -> Self {
        Self {
            id: state.config.id.clone(),
            status: state.status,
            config: TickerConfigView::from(state.config.as_ref()),
            last_price: state.last_price,
            last_updated: state.last_updated,
            last_display: state.last_display,
            consecutive_errors: state.consecutive_errors,
            last_error: state.last_error,
        }
    }
}

impl HealthResponse {
    pub fn new(counts: TickerCounts, managed: bool) -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            managed,
            tickers: counts.total,
            running: counts.running,
            backing_off: counts.backing_off,
            stopped: counts.stopped,
            timestamp: Utc::now(),
        }
    }
}
