//! Error types for ticker lifecycle operations

use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by [`TickerManager`](super::TickerManager) operations
///
/// - **Request Errors**: `InvalidConfig`, `DuplicateId`, `NotFound`
/// - **Internal Errors**: `Store`, `Scheduler`
#[derive(Debug, Error)]
pub enum TickerError {
    /// The submitted definition failed validation
    #[error("Invalid ticker config: {0}")]
    InvalidConfig(String),

    /// A ticker with this id is already running or stored
    #[error("Ticker already exists: {0}")]
    DuplicateId(String),

    #[error("Ticker not found: {0}")]
    NotFound(String),

    /// Persistence failed; the operation was not applied
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl TickerError {
    /// Returns true if the caller's request was at fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TickerError::InvalidConfig(_) | TickerError::DuplicateId(_) | TickerError::NotFound(_)
        )
    }
}
