use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{StoreError, TickerStore};
use crate::models::TickerSpec;

/// Store that lives only as long as the process
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, TickerSpec>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl TickerStore for MemoryStore {
    async fn save_or_replace(&self, id: &str, spec: &TickerSpec) -> Result<(), StoreError> {
        self.records.write().insert(id.to_string(), spec.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(id).is_some())
    }

    async fn get(&self, id: &str) -> Result<Option<TickerSpec>, StoreError> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<(String, TickerSpec)>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .map(|(id, spec)| (id.clone(), spec.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;
    use crate::testing::spec;

    #[tokio::test]
    async fn test_memory_store_crud() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.save_or_replace("b", &spec("b", "ETH", SourceKind::Crypto)).await.unwrap();
        store.save_or_replace("a", &spec("a", "BTC", SourceKind::Crypto)).await.unwrap();

        let ids: Vec<String> = store.load_all().await.unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.len(), 1);
        assert!(store.get("b").await.unwrap().is_some());
    }
}
