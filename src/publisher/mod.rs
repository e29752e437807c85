//! Presence publishers push a ticker's display string to its bot identity.
//!
//! A [`PublisherFactory`] turns a ticker's credential into a connected
//! [`PresencePublisher`]; the manager does this once per worker start.

pub mod discord;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::TickerConfig;

pub use discord::{DiscordFactory, DiscordPublisher};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("bot credential rejected")]
    Unauthorized,

    #[error("rate limited by bot platform")]
    RateLimited { retry_after: Option<Duration> },

    #[error("bot platform returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("bot platform request timed out")]
    Timeout,

    #[error("publisher connect failed: {0}")]
    Connect(String),
}

impl PublishError {
    /// Errors that retrying with the same credential cannot fix
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublishError::Unauthorized)
    }
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PublishError::Timeout
        } else {
            PublishError::Http(e)
        }
    }
}

/// One bot identity's display
#[async_trait]
pub trait PresencePublisher: Send + Sync {
    async fn publish(&self, display: &str) -> Result<(), PublishError>;

    /// Release whatever the publisher holds. Called once when its worker stops.
    async fn shutdown(&self) {}
}

/// Builds publishers for tickers
#[async_trait]
pub trait PublisherFactory: Send + Sync {
    async fn connect(&self, config: &TickerConfig) -> Result<Box<dyn PresencePublisher>, PublishError>;
}
