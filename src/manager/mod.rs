//! Ticker lifecycle management
//!
//! - `manager` - create, delete, list, restart, boot and shutdown
//! - `registry` - per-id slots and locking
//! - `retry` - delayed retries of failed worker starts
//! - `reconcile` - managed mode reconciliation against the store
//! - `errors` - error types for lifecycle operations

pub mod errors;
#[allow(clippy::module_inception)]
pub mod manager;
pub mod reconcile;
pub mod registry;
pub mod retry;

pub use errors::TickerError;
pub use manager::{BootReport, TickerCounts, TickerManager};
pub use reconcile::ReconcileReport;
