//! Durable ticker persistence
//!
//! - `file` - one JSON document per ticker in a directory
//! - `memory` - process-local store for tests and storeless runs

pub mod file;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::TickerSpec;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt ticker record {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode ticker {id}: {source}")]
    Encode {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("ticker id {0:?} cannot name a record")]
    InvalidId(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value persistence of ticker definitions keyed by id.
///
/// Records are stored as [`TickerSpec`] with the id filled in. Every write
/// is durable by the time the returned future completes.
#[async_trait]
pub trait TickerStore: Send + Sync {
    async fn save_or_replace(&self, id: &str, spec: &TickerSpec) -> Result<(), StoreError>;

    /// Remove a record. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<TickerSpec>, StoreError>;

    /// Every stored record as `(id, spec)`, ordered by id
    async fn load_all(&self) -> Result<Vec<(String, TickerSpec)>, StoreError>;
}
