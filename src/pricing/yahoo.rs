use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{check_status, decimal_from_json, FetchError, PriceSource};
use crate::models::{PriceQuote, TickerConfig};

pub const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Stock quotes from the Yahoo Finance chart endpoint
pub struct YahooSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    regular_market_price: Option<serde_json::Value>,
    #[serde(default)]
    chart_previous_close: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    description: String,
}

impl YahooSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_base_url(client, YAHOO_BASE_URL)
    }

    pub fn with_base_url(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn chart_url(&self, symbol: &str) -> Result<reqwest::Url, FetchError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| FetchError::Parse(format!("bad base url {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| FetchError::Parse(format!("bad base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        Ok(url)
    }
}

#[async_trait]
impl PriceSource for YahooSource {
    async fn fetch(&self, config: &TickerConfig) -> Result<PriceQuote, FetchError> {
        let symbol = config.symbol.to_uppercase();
        let url = self.chart_url(&symbol)?;

        tracing::debug!(symbol = %symbol, "Fetching stock quote");

        let response = self
            .client
            .get(url)
            .query(&[("interval", "1d"), ("range", "1d")])
            .send()
            .await?;

        // Yahoo reports unknown symbols as 404 with a JSON error body
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::UnknownSymbol(symbol));
        }

        let envelope: ChartEnvelope = check_status(response).await?.json().await?;

        if let Some(error) = envelope.chart.error {
            if error.code.eq_ignore_ascii_case("not found") {
                return Err(FetchError::UnknownSymbol(symbol));
            }
            return Err(FetchError::Parse(format!("{}: {}", error.code, error.description)));
        }

        let meta = envelope
            .chart
            .result
            .and_then(|r| r.into_iter().next())
            .map(|r| r.meta)
            .ok_or_else(|| FetchError::UnknownSymbol(symbol.clone()))?;

        let price = meta
            .regular_market_price
            .as_ref()
            .and_then(decimal_from_json)
            .ok_or_else(|| FetchError::Parse("missing regularMarketPrice".to_string()))?;

        let previous = meta.chart_previous_close.as_ref().and_then(decimal_from_json);
        let (change, change_pct) = match previous {
            Some(prev) if !prev.is_zero() => {
                let change = price - prev;
                (Some(change), Some(change / prev * rust_decimal::Decimal::ONE_HUNDRED))
            }
            _ => (None, None),
        };

        Ok(PriceQuote {
            price,
            change,
            change_pct,
            currency: meta.currency,
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

    fn stock(symbol: &str) -> TickerConfig {
        TickerConfig::from_spec(spec("aapl", symbol, SourceKind::Stock)).unwrap()
    }

    #[tokio::test]
    async fn test_parses_chart_meta() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v8/finance/chart/AAPL")
            .match_query(mockito::Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"chart":{"result":[{"meta":{"currency":"USD","regularMarketPrice":110.0,"chartPreviousClose":100.0}}],"error":null}}"#,
            )
            .create_async()
            .await;

        let source = YahooSource::with_base_url(http_client(DEFAULT_FETCH_TIMEOUT), server.url());
        let quote = source.fetch(&stock("aapl")).await.unwrap();

        mock.assert_async().await;
        assert_eq!(quote.price, dec!(110));
        assert_eq!(quote.change, Some(dec!(10)));
        assert_eq!(quote.change_pct, Some(dec!(10)));
        assert_eq!(quote.currency.as_deref(), Some("USD"));
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v8/finance/chart/NOPE")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .with_body(r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#)
            .create_async()
            .await;

        let source = YahooSource::with_base_url(http_client(DEFAULT_FETCH_TIMEOUT), server.url());
        let err = source.fetch(&stock("NOPE")).await.unwrap_err();
        assert!(matches!(err, FetchError::UnknownSymbol(s) if s == "NOPE"));
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v8/finance/chart/AAPL")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_header("retry-after", "7")
            .create_async()
            .await;

        let source = YahooSource::with_base_url(http_client(DEFAULT_FETCH_TIMEOUT), server.url());
        let err = source.fetch(&stock("AAPL")).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::RateLimited { retry_after: Some(d) } if d.as_secs() == 7
        ));
    }
}
