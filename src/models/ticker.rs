use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::worker::display::{DisplayTemplate, DEFAULT_TEMPLATE};

/// Longest accepted explicit ticker id
pub const MAX_ID_LEN: usize = 64;

/// Most decimal places a price can be rendered with
pub const MAX_DECIMALS: u32 = 8;

const DEFAULT_DECIMALS: u32 = 2;
const DEFAULT_CRYPTO_CURRENCY: &str = "usd";

/// Where a ticker's price comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Stock,
    Crypto,
    Custom,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Stock => write!(f, "stock"),
            SourceKind::Crypto => write!(f, "crypto"),
            SourceKind::Custom => write!(f, "custom"),
        }
    }
}

/// Ticker definition as submitted to `POST /ticker` and as persisted.
///
/// This is the loose wire shape. It only becomes a [`TickerConfig`] after
/// validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TickerSpec {
    /// Explicit id. Derived from symbol, source and bot token when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: String,
    pub source: SourceKind,
    /// Quote currency for crypto tickers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Endpoint for custom tickers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// JSON pointer to the price inside the custom endpoint's response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer: Option<String>,
    /// Polling interval in seconds, 0 inherits the process default
    #[serde(default)]
    pub frequency: i64,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u32>,
}

/// Validated price source of a ticker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceSourceSpec {
    Stock,
    Crypto { currency: String },
    Custom { url: String, pointer: String },
}

impl PriceSourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            PriceSourceSpec::Stock => SourceKind::Stock,
            PriceSourceSpec::Crypto { .. } => SourceKind::Crypto,
            PriceSourceSpec::Custom { .. } => SourceKind::Custom,
        }
    }

    /// Part of the price cache key beyond the symbol, so tickers that only
    /// share a symbol but quote differently don't collide
    pub fn cache_discriminator(&self) -> String {
        match self {
            PriceSourceSpec::Stock => "stock".to_string(),
            PriceSourceSpec::Crypto { currency } => format!("crypto:{}", currency),
            PriceSourceSpec::Custom { url, pointer } => format!("custom:{}#{}", url, pointer),
        }
    }
}

/// A validated, immutable ticker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerConfig {
    pub id: String,
    pub name: Option<String>,
    pub symbol: String,
    pub source: PriceSourceSpec,
    /// Polling interval in seconds, 0 inherits the process default
    pub frequency: u64,
    pub bot_token: String,
    pub template: DisplayTemplate,
    pub decimals: u32,
}

impl TickerConfig {
    /// Validate a submitted spec
    pub fn from_spec(spec: TickerSpec) -> Result<Self, String> {
        let symbol = spec.symbol.trim().to_string();
        if symbol.is_empty() {
            return Err("symbol must not be empty".to_string());
        }

        let bot_token = spec.bot_token.trim().to_string();
        if bot_token.is_empty() {
            return Err("bot_token must not be empty".to_string());
        }

        if spec.frequency < 0 {
            return Err(format!("frequency must be >= 0, got {}", spec.frequency));
        }

        let source = match spec.source {
            SourceKind::Stock => {
                reject_custom_fields(&spec)?;
                if spec.currency.is_some() {
                    return Err("currency is only valid for crypto tickers".to_string());
                }
                PriceSourceSpec::Stock
            }
            SourceKind::Crypto => {
                reject_custom_fields(&spec)?;
                let currency = spec
                    .currency
                    .as_deref()
                    .map(|c| c.trim().to_lowercase())
                    .unwrap_or_else(|| DEFAULT_CRYPTO_CURRENCY.to_string());
                if currency.is_empty() || !currency.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(format!("invalid currency '{}'", currency));
                }
                PriceSourceSpec::Crypto { currency }
            }
            SourceKind::Custom => {
                let url = spec
                    .url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| "custom tickers require a url".to_string())?;
                let parsed =
                    reqwest::Url::parse(url).map_err(|e| format!("invalid url '{}': {}", url, e))?;
                if parsed.scheme() != "http" && parsed.scheme() != "https" {
                    return Err(format!("url must be http or https, got '{}'", parsed.scheme()));
                }
                let pointer = spec.pointer.clone().unwrap_or_default();
                if !pointer.is_empty() && !pointer.starts_with('/') {
                    return Err(format!("pointer must start with '/', got '{}'", pointer));
                }
                PriceSourceSpec::Custom {
                    url: url.to_string(),
                    pointer,
                }
            }
        };

        let template = match spec.display_template.as_deref() {
            Some(raw) => DisplayTemplate::parse(raw).map_err(|e| format!("display_template: {}", e))?,
            None => DisplayTemplate::default(),
        };

        let decimals = spec.decimals.unwrap_or(DEFAULT_DECIMALS);
        if decimals > MAX_DECIMALS {
            return Err(format!("decimals must be <= {}, got {}", MAX_DECIMALS, decimals));
        }

        let id = match spec.id.as_deref().map(str::trim) {
            Some(id) => {
                validate_id(id)?;
                id.to_string()
            }
            None => derive_id(source.kind(), &symbol, &bot_token),
        };

        Ok(Self {
            id,
            name: spec.name.filter(|n| !n.trim().is_empty()),
            symbol,
            source,
            frequency: spec.frequency as u64,
            bot_token,
            template,
            decimals,
        })
    }

    /// Persistable form of this config, always carrying the resolved id
    pub fn to_spec(&self) -> TickerSpec {
        let (currency, url, pointer) = match &self.source {
            PriceSourceSpec::Stock => (None, None, None),
            PriceSourceSpec::Crypto { currency } => (Some(currency.clone()), None, None),
            PriceSourceSpec::Custom { url, pointer } => {
                (None, Some(url.clone()), Some(pointer.clone()))
            }
        };

        TickerSpec {
            id: Some(self.id.clone()),
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            source: self.source.kind(),
            currency,
            url,
            pointer,
            frequency: self.frequency as i64,
            bot_token: self.bot_token.clone(),
            display_template: Some(self.template.as_str().to_string()),
            decimals: Some(self.decimals),
        }
    }

    /// Interval between successful updates: the larger of the ticker's own
    /// frequency and the process default, falling back to `fallback` when
    /// both are zero
    pub fn effective_frequency(&self, process_default: Duration, fallback: Duration) -> Duration {
        let own = Duration::from_secs(self.frequency);
        let frequency = own.max(process_default);
        if frequency.is_zero() {
            fallback
        } else {
            frequency
        }
    }

    /// Quote currency, when the source defines one up front
    pub fn currency(&self) -> Option<&str> {
        match &self.source {
            PriceSourceSpec::Crypto { currency } => Some(currency),
            _ => None,
        }
    }
}

fn reject_custom_fields(spec: &TickerSpec) -> Result<(), String> {
    if spec.url.is_some() || spec.pointer.is_some() {
        return Err("url and pointer are only valid for custom tickers".to_string());
    }
    Ok(())
}

/// Ids name store records, so they are restricted to a filename-safe alphabet
pub fn validate_id(id: &str) -> Result<(), String> {
    if id.is_empty() || id.len() > MAX_ID_LEN {
        return Err(format!("id must be 1-{} characters", MAX_ID_LEN));
    }
    if id.starts_with('.') || id.contains("..") {
        return Err("id must not start with '.' or contain '..'".to_string());
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(format!("id '{}' may only contain [A-Za-z0-9._-]", id));
    }
    Ok(())
}

/// Stable id for a ticker definition without an explicit one
pub fn derive_id(source: SourceKind, symbol: &str, bot_token: &str) -> String {
    let name = format!("{}:{}:{}", source, symbol.to_uppercase(), bot_token);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(source: SourceKind) -> TickerSpec {
        TickerSpec {
            id: None,
            name: None,
            symbol: "BTC".to_string(),
            source,
            currency: None,
            url: None,
            pointer: None,
            frequency: 60,
            bot_token: "token-a".to_string(),
            display_template: None,
            decimals: None,
        }
    }

    #[test]
    fn test_crypto_defaults() {
        let config = TickerConfig::from_spec(spec(SourceKind::Crypto)).unwrap();
        assert_eq!(
            config.source,
            PriceSourceSpec::Crypto {
                currency: "usd".to_string()
            }
        );
        assert_eq!(config.decimals, 2);
        assert_eq!(config.template.as_str(), DEFAULT_TEMPLATE);
    }

    #[test]
    fn test_derived_id_is_stable() {
        let a = TickerConfig::from_spec(spec(SourceKind::Stock)).unwrap();
        let b = TickerConfig::from_spec(spec(SourceKind::Stock)).unwrap();
        let c = TickerConfig::from_spec(spec(SourceKind::Crypto)).unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_explicit_id() {
        let mut s = spec(SourceKind::Crypto);
        s.id = Some("btc-1".to_string());
        assert_eq!(TickerConfig::from_spec(s).unwrap().id, "btc-1");
    }

    #[test]
    fn test_rejects_invalid_fields() {
        let mut s = spec(SourceKind::Stock);
        s.symbol = "  ".to_string();
        assert!(TickerConfig::from_spec(s).is_err());

        let mut s = spec(SourceKind::Stock);
        s.bot_token = String::new();
        assert!(TickerConfig::from_spec(s).is_err());

        let mut s = spec(SourceKind::Stock);
        s.frequency = -1;
        assert!(TickerConfig::from_spec(s).is_err());

        let mut s = spec(SourceKind::Stock);
        s.id = Some("../etc".to_string());
        assert!(TickerConfig::from_spec(s).is_err());

        let mut s = spec(SourceKind::Stock);
        s.id = Some("a..b".to_string());
        assert!(TickerConfig::from_spec(s).is_err());
        assert!(validate_id("btc.usd-1_x").is_ok());

        let mut s = spec(SourceKind::Stock);
        s.url = Some("https://example.com".to_string());
        assert!(TickerConfig::from_spec(s).is_err());

        let mut s = spec(SourceKind::Custom);
        assert!(TickerConfig::from_spec(s.clone()).is_err());
        s.url = Some("ftp://example.com/price".to_string());
        assert!(TickerConfig::from_spec(s).is_err());

        let mut s = spec(SourceKind::Stock);
        s.display_template = Some("{volume}".to_string());
        assert!(TickerConfig::from_spec(s).is_err());

        let mut s = spec(SourceKind::Stock);
        s.decimals = Some(12);
        assert!(TickerConfig::from_spec(s).is_err());
    }

    #[test]
    fn test_spec_roundtrip_keeps_id() {
        let mut s = spec(SourceKind::Custom);
        s.url = Some("https://example.com/api".to_string());
        s.pointer = Some("/data/price".to_string());
        let config = TickerConfig::from_spec(s).unwrap();
        let stored = config.to_spec();
        assert_eq!(stored.id.as_deref(), Some(config.id.as_str()));
        assert_eq!(TickerConfig::from_spec(stored).unwrap(), config);
    }

    #[test]
    fn test_effective_frequency() {
        let mut config = TickerConfig::from_spec(spec(SourceKind::Stock)).unwrap();
        let fallback = Duration::from_secs(60);
        assert_eq!(
            config.effective_frequency(Duration::from_secs(120), fallback),
            Duration::from_secs(120)
        );
        assert_eq!(
            config.effective_frequency(Duration::ZERO, fallback),
            Duration::from_secs(60)
        );
        config.frequency = 0;
        assert_eq!(config.effective_frequency(Duration::ZERO, fallback), fallback);
        assert_eq!(
            config.effective_frequency(Duration::from_millis(5), fallback),
            Duration::from_millis(5)
        );
    }

    #[test]
    fn test_spec_from_json() {
        let json = r#"{"id":"btc-1","symbol":"BTC","source":"crypto","frequency":60,"bot_token":"x"}"#;
        let spec: TickerSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.source, SourceKind::Crypto);
        assert_eq!(spec.frequency, 60);
    }
}
