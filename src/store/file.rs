use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{StoreError, TickerStore};
use crate::models::TickerSpec;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// Directory of ticker records, one `<id>.json` per ticker.
///
/// Writes go to a temp file that is fsynced and renamed over the record,
/// so a crash leaves either the old or the new record, never a torn one.
/// Records for different ids never touch the same file, so their writes
/// proceed concurrently.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let store = Self { dir };
        store.remove_stale_temp_files().await?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records must stay directly inside the store directory
    fn checked_id(id: &str) -> Result<&str, StoreError> {
        let unsafe_id = id.is_empty()
            || id.starts_with('.')
            || id.contains("..")
            || id.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
        if unsafe_id {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(id)
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let id = Self::checked_id(id)?;
        Ok(self.dir.join(format!("{}.{}", id, RECORD_EXTENSION)))
    }

    fn temp_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let id = Self::checked_id(id)?;
        Ok(self.dir.join(format!(".{}.{}", id, TEMP_EXTENSION)))
    }

    async fn remove_stale_temp_files(&self) -> Result<(), StoreError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == TEMP_EXTENSION).unwrap_or(false) {
                tracing::warn!(path = %path.display(), "Removing interrupted ticker write");
                fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn read_record(path: &Path) -> Result<Option<TickerSpec>, StoreError> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })
    }

    async fn sync_dir(&self) -> io::Result<()> {
        // Directory fsync makes the rename itself durable. Not every platform
        // allows opening a directory, so failure here is tolerated.
        match fs::File::open(&self.dir).await {
            Ok(dir) => dir.sync_all().await.or(Ok(())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl TickerStore for FileStore {
    async fn save_or_replace(&self, id: &str, spec: &TickerSpec) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec_pretty(spec).map_err(|source| StoreError::Encode {
            id: id.to_string(),
            source,
        })?;

        let temp = self.temp_path(id)?;
        let record = self.record_path(id)?;
        let mut file = fs::File::create(&temp).await?;
        file.write_all(&encoded).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp, record).await?;
        self.sync_dir().await?;

        tracing::debug!(id = %id, "Ticker record written");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.record_path(id)?).await {
            Ok(()) => {
                self.sync_dir().await?;
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<TickerSpec>, StoreError> {
        Self::read_record(&self.record_path(id)?).await
    }

    async fn load_all(&self) -> Result<Vec<(String, TickerSpec)>, StoreError> {
        let mut records = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e != RECORD_EXTENSION).unwrap_or(true) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(spec)) => records.push((id, spec)),
                Ok(None) => {}
                // One unreadable record must not hide the others
                Err(e @ StoreError::Corrupt { .. }) => {
                    tracing::error!(id = %id, "Skipping ticker record: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}
