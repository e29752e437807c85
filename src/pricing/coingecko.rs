use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::{check_status, decimal_from_json, FetchError, PriceSource};
use crate::models::{PriceQuote, TickerConfig};

pub const COINGECKO_BASE_URL: &str = "https://api.coingecko.com";

/// Crypto quotes from the CoinGecko simple price endpoint.
///
/// The ticker symbol is used, lower-cased, as the CoinGecko coin id
/// (`bitcoin`, `ethereum`, ...).
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

type SimplePrice = HashMap<String, HashMap<String, serde_json::Value>>;

impl CoinGeckoSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, COINGECKO_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch(&self, config: &TickerConfig) -> Result<PriceQuote, FetchError> {
        let coin = config.symbol.to_lowercase();
        let currency = config.currency().unwrap_or("usd").to_lowercase();
        let url = format!("{}/api/v3/simple/price", self.base_url.trim_end_matches('/'));

        tracing::debug!(coin = %coin, currency = %currency, "Fetching crypto quote");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("ids", coin.as_str()),
                ("vs_currencies", currency.as_str()),
                ("include_24hr_change", "true"),
            ])
            .send()
            .await?;

        let mut body: SimplePrice = check_status(response).await?.json().await?;

        let fields = body
            .remove(&coin)
            .ok_or_else(|| FetchError::UnknownSymbol(config.symbol.clone()))?;

        let price = fields
            .get(&currency)
            .and_then(decimal_from_json)
            .ok_or_else(|| FetchError::Parse(format!("no {} price for {}", currency, coin)))?;

        let change_pct = fields
            .get(&format!("{}_24h_change", currency))
            .and_then(decimal_from_json);

        // Absolute change implied by the 24h percentage
        let change = change_pct.and_then(|pct| {
            let base = Decimal::ONE_HUNDRED + pct;
            if base.is_zero() {
                None
            } else {
                let previous = price * Decimal::ONE_HUNDRED / base;
                Some(price - previous)
            }
        });

        Ok(PriceQuote {
            price,
            change,
            change_pct,
            currency: Some(currency),
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use crate::pricing::{http_client, DEFAULT_FETCH_TIMEOUT};
    use crate::testing::spec;
    use rust_decimal_macros::dec;

    fn crypto(symbol: &str, currency: Option<&str>) -> TickerConfig {
        let mut s = spec("coin", symbol, SourceKind::Crypto);
        s.currency = currency.map(str::to_string);
        TickerConfig::from_spec(s).unwrap()
    }

    #[tokio::test]
    async fn test_parses_simple_price() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v3/simple/price")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("ids".into(), "bitcoin".into()),
                mockito::Matcher::UrlEncoded("vs_currencies".into(), "eur".into()),
            ]))
            .with_header("content-type", "application/json")
            .with_body(r#"{"bitcoin":{"eur":125,"eur_24h_change":25}}"#)
            .create_async()
            .await;

        let source = CoinGeckoSource::with_base_url(http_client(DEFAULT_FETCH_TIMEOUT), server.url());
        let quote = source.fetch(&crypto("Bitcoin", Some("EUR"))).await.unwrap();

        mock.assert_async().await;
        assert_eq!(quote.price, dec!(125));
        assert_eq!(quote.change_pct, Some(dec!(25)));
        assert_eq!(quote.change, Some(dec!(25)));
        assert_eq!(quote.currency.as_deref(), Some("eur"));
    }

    #[tokio::test]
    async fn test_unknown_coin() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v3/simple/price")
            .match_query(mockito::Matcher::Any)
            .with_body("{}")
            .create_async()
            .await;

        let source = CoinGeckoSource::with_base_url(http_client(DEFAULT_FETCH_TIMEOUT), server.url());
        let err = source.fetch(&crypto("notacoin", None)).await.unwrap_err();
        assert!(matches!(err, FetchError::UnknownSymbol(_)));
    }
}
