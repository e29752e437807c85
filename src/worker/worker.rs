use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::board::StateBoard;
use crate::config::{BackoffConfig, ManagerConfig};
use crate::models::{PriceQuote, TickerConfig, TickerStatus};
use crate::pricing::{FetchError, PriceSource};
use crate::publisher::{PresencePublisher, PublishError};

/// Process-wide knobs every worker shares
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub default_frequency: Duration,
    pub fallback_frequency: Duration,
    /// Consecutive failures tolerated before the worker stops; 0 retries forever
    pub retry_ceiling: u32,
    pub backoff: BackoffConfig,
}

impl From<&ManagerConfig> for WorkerSettings {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            default_frequency: config.default_frequency,
            fallback_frequency: config.fallback_frequency,
            retry_ceiling: config.retry_ceiling,
            backoff: config.backoff.clone(),
        }
    }
}

/// Why a worker returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    RetryCeiling { errors: u32, last_error: String },
    /// The task unwound; reported by whoever spawned it
    Panicked,
}

#[derive(Debug, Error)]
enum TickFault {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
}

impl TickFault {
    fn retry_after(&self) -> Option<Duration> {
        match self {
            TickFault::Fetch(FetchError::RateLimited { retry_after })
            | TickFault::Publish(PublishError::RateLimited { retry_after }) => *retry_after,
            _ => None,
        }
    }
}

/// Periodic update loop for one ticker.
///
/// Each iteration fetches a quote, renders the display string and publishes
/// it, then sleeps for the ticker's frequency. Failures back off
/// exponentially. The loop returns once its token is cancelled or, with a
/// non-zero ceiling, after too many consecutive failures.
pub struct TickerWorker {
    config: Arc<TickerConfig>,
    source: Arc<dyn PriceSource>,
    publisher: Box<dyn PresencePublisher>,
    board: Arc<StateBoard>,
    settings: WorkerSettings,
    cancel: CancellationToken,
    nudge: Arc<Notify>,
    last_published: Option<String>,
}

impl TickerWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<TickerConfig>,
        source: Arc<dyn PriceSource>,
        publisher: Box<dyn PresencePublisher>,
        board: Arc<StateBoard>,
        settings: WorkerSettings,
        cancel: CancellationToken,
        nudge: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            source,
            publisher,
            board,
            settings,
            cancel,
            nudge,
            last_published: None,
        }
    }

    pub async fn run(mut self) -> WorkerExit {
        let id = self.config.id.clone();
        let frequency = self
            .config
            .effective_frequency(self.settings.default_frequency, self.settings.fallback_frequency);
        let mut backoff = Backoff::new(self.settings.backoff.clone());
        let mut force = true;

        tracing::info!(id = %id, symbol = %self.config.symbol, every = ?frequency, "Worker started");

        let exit = loop {
            if self.cancel.is_cancelled() {
                break WorkerExit::Cancelled;
            }

            let cancel = self.cancel.clone();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break WorkerExit::Cancelled,
                outcome = self.tick(force) => outcome,
            };

            let delay = match outcome {
                Ok(()) => {
                    force = false;
                    backoff.reset();
                    frequency
                }
                Err(fault) => {
                    let message = fault.to_string();
                    let mut errors = 0;
                    self.board.update(&id, |state| {
                        state.consecutive_errors += 1;
                        state.last_error = Some(message.clone());
                        errors = state.consecutive_errors;
                    });

                    let ceiling = self.settings.retry_ceiling;
                    if ceiling > 0 && errors > ceiling {
                        tracing::error!(id = %id, errors, "Giving up after repeated failures: {}", message);
                        break WorkerExit::RetryCeiling {
                            errors,
                            last_error: message,
                        };
                    }

                    self.board.transition(&id, TickerStatus::BackingOff);
                    let mut delay = backoff.next_delay();
                    if let Some(retry_after) = fault.retry_after() {
                        delay = delay.max(retry_after);
                    }
                    tracing::warn!(id = %id, errors, retry_in = ?delay, "{}", message);
                    delay
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break WorkerExit::Cancelled,
                _ = self.nudge.notified() => {
                    tracing::debug!(id = %id, "Re-publish requested");
                    force = true;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        self.board.transition(&id, TickerStatus::Stopped);
        self.publisher.shutdown().await;
        tracing::info!(id = %id, reason = ?exit, "Worker stopped");
        exit
    }

    /// One fetch → format → publish pass
    async fn tick(&mut self, force: bool) -> Result<(), TickFault> {
        let quote = self.source.fetch(&self.config).await?;
        self.record_quote(&quote);

        let rendered = self
            .config
            .template
            .render(&self.config.symbol, &quote, self.config.decimals);

        let unchanged = self.last_published.as_deref() == Some(rendered.as_str());
        if unchanged && !force {
            tracing::trace!(id = %self.config.id, "Display unchanged");
        } else {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            self.publisher.publish(&rendered).await?;
            tracing::debug!(id = %self.config.id, display = %rendered, "Published");
            self.last_published = Some(rendered.clone());
        }

        self.board.update(&self.config.id, |state| {
            state.last_display = Some(rendered);
            state.consecutive_errors = 0;
            state.last_error = None;
        });
        self.board.transition(&self.config.id, TickerStatus::Running);
        Ok(())
    }

    fn record_quote(&self, quote: &PriceQuote) {
        self.board.update(&self.config.id, |state| {
            state.last_price = Some(quote.price);
            state.last_updated = Some(Utc::now());
        });
    }
}
