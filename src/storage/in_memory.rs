use async_trait::async_trait;
use dashmap::DashMap;

use super::{Memory, StorageResult};

/// Process-local backend on a `DashMap`. Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct InMemory {
    data: DashMap<String, Vec<u8>>,
}

impl InMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: impl IntoIterator<Item = (String, Vec<u8>)>) -> Self {
        Self {
            data: entries.into_iter().collect(),
        }
    }

    pub(crate) fn snapshot(&self) -> std::collections::BTreeMap<String, Vec<u8>> {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[async_trait]
impl Memory for InMemory {
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|value| value.clone()))
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        Ok(self.data.remove(key).is_some())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.data.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}
