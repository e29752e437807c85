use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single price observation from a price source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Decimal,
    /// Absolute change against the previous close, when the source reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<Decimal>,
    /// Percentage change over the source's reference window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_pct: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl PriceQuote {
    pub fn new(price: Decimal) -> Self {
        Self {
            price,
            change: None,
            change_pct: None,
            currency: None,
            fetched_at: Utc::now(),
        }
    }
}
