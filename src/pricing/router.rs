use async_trait::async_trait;
use std::sync::Arc;

use super::{FetchError, PriceSource};
use crate::models::{PriceQuote, SourceKind, TickerConfig};

/// Sends each ticker to the source matching its kind
pub struct SourceRouter {
    stock: Arc<dyn PriceSource>,
    crypto: Arc<dyn PriceSource>,
    custom: Arc<dyn PriceSource>,
}

impl SourceRouter {
    pub fn new(
        stock: Arc<dyn PriceSource>,
        crypto: Arc<dyn PriceSource>,
        custom: Arc<dyn PriceSource>,
    ) -> Self {
        Self {
            stock,
            crypto,
            custom,
        }
    }

    /// Router over the public Yahoo and CoinGecko APIs
    pub fn public(client: reqwest::Client) -> Self {
        Self::new(
            Arc::new(super::YahooSource::new(client.clone())),
            Arc::new(super::CoinGeckoSource::new(client.clone())),
            Arc::new(super::CustomSource::new(client)),
        )
    }
}

#[async_trait]
impl PriceSource for SourceRouter {
    async fn fetch(&self, config: &TickerConfig) -> Result<PriceQuote, FetchError> {
        match config.source.kind() {
            SourceKind::Stock => self.stock.fetch(config).await,
            SourceKind::Crypto => self.crypto.fetch(config).await,
            SourceKind::Custom => self.custom.fetch(config).await,
        }
    }
}
