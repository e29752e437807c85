pub mod quote;
pub mod state;
pub mod ticker;

pub use quote::PriceQuote;
pub use state::{TickerState, TickerStatus};
pub use ticker::{derive_id, validate_id, PriceSourceSpec, SourceKind, TickerConfig, TickerSpec};
