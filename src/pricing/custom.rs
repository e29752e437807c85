use async_trait::async_trait;
use chrono::Utc;

use super::{check_status, decimal_from_json, FetchError, PriceSource};
use crate::models::{PriceQuote, PriceSourceSpec, TickerConfig};

/// Prices read from an arbitrary JSON endpoint
pub struct CustomSource {
    client: reqwest::Client,
}

impl CustomSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PriceSource for CustomSource {
    async fn fetch(&self, config: &TickerConfig) -> Result<PriceQuote, FetchError> {
        let PriceSourceSpec::Custom { url, pointer } = &config.source else {
            return Err(FetchError::Parse(format!(
                "ticker {} is not a custom ticker",
                config.id
            )));
        };

        let response = self.client.get(url).send().await?;
        let body: serde_json::Value = check_status(response).await?.json().await?;

        let value = if pointer.is_empty() {
            Some(&body)
        } else {
            body.pointer(pointer)
        };

        let price = value
            .and_then(decimal_from_json)
            .ok_or_else(|| FetchError::Parse(format!("no number at '{}' in response", pointer)))?;

        Ok(PriceQuote {
            price,
            change: None,
            change_pct: None,
            currency: None,
            fetched_at: Utc::now(),
        })
    }
}
