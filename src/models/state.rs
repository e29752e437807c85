use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::ticker::TickerConfig;

/// Worker lifecycle: starting → running ⇄ backing-off → stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TickerStatus {
    Starting,
    Running,
    BackingOff,
    Stopped,
}

impl TickerStatus {
    /// Whether moving to `next` follows the worker lifecycle
    pub fn can_transition_to(self, next: TickerStatus) -> bool {
        use TickerStatus::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Starting, Running) | (Starting, BackingOff) => true,
            (Running, BackingOff) | (BackingOff, Running) => true,
            (a, b) => a == b,
        }
    }
}

/// Last known state of one ticker.
///
/// Written by the ticker's worker, read as snapshots by the manager.
#[derive(Debug, Clone)]
pub struct TickerState {
    pub config: Arc<TickerConfig>,
    pub status: TickerStatus,
    pub last_price: Option<Decimal>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_display: Option<String>,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

impl TickerState {
    pub fn starting(config: Arc<TickerConfig>) -> Self {
        Self {
            config,
            status: TickerStatus::Starting,
            last_price: None,
            last_updated: None,
            last_display: None,
            consecutive_errors: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use TickerStatus::*;
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(BackingOff));
        assert!(BackingOff.can_transition_to(Running));
        assert!(BackingOff.can_transition_to(Stopped));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopped.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TickerStatus::BackingOff).unwrap(),
            "\"backing-off\""
        );
    }
}
