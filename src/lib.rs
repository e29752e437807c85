// Library Crate Root
// main.rs imports through lib.rs like an external crate
pub mod api;
pub mod cli;
pub mod config;
pub mod manager;
pub mod models;
pub mod pricing;
pub mod provision;
pub mod publisher;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use config::{BackoffConfig, CacheConfig, ManagerConfig};
pub use manager::{TickerError, TickerManager};
pub use models::{PriceQuote, SourceKind, TickerConfig, TickerSpec, TickerState, TickerStatus};
