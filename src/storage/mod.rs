//! Key/value memory for handler bodies.
//!
//! The brain never touches storage itself; handlers reach it through the
//! [`Storage`] facade handed out by the bot. Values are serialized by a
//! [`MemoryEncoder`] (JSON by default) and persisted as raw bytes by a
//! [`Memory`] backend.
//!
//! Backends:
//! - [`InMemory`]: process-local, lost on exit.
//! - [`FileMemory`]: one JSON document on disk, rewritten atomically.
//! - [`RedisMemory`]: one hash on a Redis server.

mod file;
mod in_memory;
mod redis_memory;

pub use file::FileMemory;
pub use in_memory::InMemory;
pub use redis_memory::RedisMemory;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, PoisonError, RwLock,
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::{StorageBackend, StorageConfig};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage is closed")]
    Closed,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Raw byte store behind [`Storage`].
#[async_trait]
pub trait Memory: Send + Sync {
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Keys in no particular order; [`Storage::keys`] sorts them.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    async fn close(&self) -> StorageResult<()>;
}

/// Turns values into bytes and back.
pub trait MemoryEncoder: Send + Sync {
    fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl MemoryEncoder for JsonEncoder {
    fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value> {
        serde_json::from_slice(bytes)
            .map_err(|e| StorageError::DeserializationError(e.to_string()))
    }
}

pub struct Storage {
    memory: RwLock<Arc<dyn Memory>>,
    encoder: RwLock<Arc<dyn MemoryEncoder>>,
    closed: AtomicBool,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }
}

impl Storage {
    pub fn new(memory: Arc<dyn Memory>) -> Self {
        Self {
            memory: RwLock::new(memory),
            encoder: RwLock::new(Arc::new(JsonEncoder)),
            closed: AtomicBool::new(false),
        }
    }

    /// Builds the backend selected in the config.
    pub async fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        let memory: Arc<dyn Memory> = match config.backend {
            StorageBackend::Memory => Arc::new(InMemory::new()),
            StorageBackend::File => {
                let path = config.path.as_ref().ok_or_else(|| {
                    StorageError::InvalidPath("file backend needs a path".to_string())
                })?;
                Arc::new(FileMemory::open(path).await?)
            }
            StorageBackend::Redis => Arc::new(RedisMemory::connect(&config.redis).await?),
        };
        debug!("Storage backend: {}", config.backend);
        Ok(Self::new(memory))
    }

    /// Swaps the backend. Values in the old backend are not migrated.
    pub fn set_memory(&self, memory: Arc<dyn Memory>) {
        *self.memory.write().unwrap_or_else(PoisonError::into_inner) = memory;
    }

    pub fn set_encoder(&self, encoder: Arc<dyn MemoryEncoder>) {
        *self.encoder.write().unwrap_or_else(PoisonError::into_inner) = encoder;
    }

    fn memory(&self) -> StorageResult<Arc<dyn Memory>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(self
            .memory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn encoder(&self) -> Arc<dyn MemoryEncoder> {
        self.encoder
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[instrument(level = "debug", skip(self, value))]
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        let bytes = self.encoder().encode(&value)?;
        self.memory()?.set(key, bytes).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(bytes) = self.memory()?.get(key).await? else {
            return Ok(None);
        };
        let value = self.encoder().decode(&bytes)?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| StorageError::DeserializationError(e.to_string()))
    }

    pub async fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.memory()?.get(key).await?.is_some())
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        self.memory()?.delete(key).await
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = self.memory()?.keys().await?;
        keys.sort();
        Ok(keys)
    }

    /// Closes the backend. Every later call, including another `close`,
    /// fails with [`StorageError::Closed`].
    pub async fn close(&self) -> StorageResult<()> {
        let memory = self.memory()?;
        self.closed.store(true, Ordering::SeqCst);
        memory.close().await
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Fact {
        subject: String,
        value: String,
    }

    #[tokio::test]
    async fn test_set_get_typed() {
        let storage = Storage::default();
        let fact = Fact {
            subject: "sky".into(),
            value: "blue".into(),
        };
        storage.set("fact", &fact).await.unwrap();

        assert_eq!(storage.get::<Fact>("fact").await.unwrap(), Some(fact));
        assert_eq!(storage.get::<Fact>("missing").await.unwrap(), None);
        assert!(storage.contains("fact").await.unwrap());
    }

    #[tokio::test]
    async fn test_get_with_wrong_type_fails() {
        let storage = Storage::default();
        storage.set("n", &42).await.unwrap();
        let err = storage.get::<Fact>("n").await.unwrap_err();
        assert!(matches!(err, StorageError::DeserializationError(_)));
    }

    #[tokio::test]
    async fn test_keys_are_sorted_and_delete_reports_presence() {
        let storage = Storage::default();
        for key in ["pear", "apple", "fig"] {
            storage.set(key, "x").await.unwrap();
        }
        assert_eq!(storage.keys().await.unwrap(), vec!["apple", "fig", "pear"]);

        assert!(storage.delete("fig").await.unwrap());
        assert!(!storage.delete("fig").await.unwrap());
        assert_eq!(storage.keys().await.unwrap(), vec!["apple", "pear"]);
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_calls() {
        let storage = Storage::default();
        storage.close().await.unwrap();
        assert!(matches!(storage.set("k", &1).await, Err(StorageError::Closed)));
        assert!(matches!(storage.close().await, Err(StorageError::Closed)));
    }

    struct ShoutingEncoder;

    impl MemoryEncoder for ShoutingEncoder {
        fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>> {
            Ok(value.to_string().to_uppercase().into_bytes())
        }

        fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value> {
            JsonEncoder.decode(bytes)
        }
    }

    #[tokio::test]
    async fn test_custom_encoder_and_memory() {
        let storage = Storage::default();
        let memory = Arc::new(InMemory::new());
        storage.set_memory(memory.clone());
        storage.set_encoder(Arc::new(ShoutingEncoder));

        storage.set("greeting", "hello").await.unwrap();
        assert_eq!(memory.get("greeting").await.unwrap(), Some(b"\"HELLO\"".to_vec()));
        assert_eq!(
            storage.get::<String>("greeting").await.unwrap(),
            Some("HELLO".to_string())
        );
    }
}
