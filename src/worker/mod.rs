//! Per-ticker workers
//!
//! - `worker` - the fetch → format → publish → sleep loop
//! - `board` - last known state shared with the manager
//! - `backoff` - exponential retry delays
//! - `display` - display string templates

pub mod backoff;
pub mod board;
pub mod display;
pub mod worker;

pub use backoff::Backoff;
pub use board::StateBoard;
pub use display::{DisplayTemplate, TemplateError};
pub use worker::{TickerWorker, WorkerExit, WorkerSettings};
