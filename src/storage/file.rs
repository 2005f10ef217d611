//! File backend: the whole store is one JSON document.
//!
//! Reads are served from an in-memory copy loaded at open. Every mutation
//! rewrites the document atomically (temporary file in the same directory,
//! then rename), so a crash never leaves a half-written store behind. The
//! copy only changes after the rewrite succeeded.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use tracing::debug;

use super::{in_memory::InMemory, Memory, StorageError, StorageResult};

#[derive(Debug)]
pub struct FileMemory {
    path: PathBuf,
    cache: InMemory,
    /// Held across snapshot, rewrite, and cache update of each mutation.
    write_lock: Mutex<()>,
}

impl FileMemory {
    /// Opens the store at `path`, creating parent directories. A missing file
    /// is an empty store.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = parent_dir(&path)?;
        fs::create_dir_all(&dir).await?;

        let entries: BTreeMap<String, Vec<u8>> = match fs::read(&path).await {
            Ok(contents) => serde_json::from_slice(&contents).map_err(|e| {
                StorageError::DeserializationError(format!(
                    "Failed to parse {}: {}",
                    path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("Opened {} with {} keys", path.display(), entries.len());

        Ok(Self {
            path,
            cache: InMemory::from_entries(entries),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> StorageResult<()> {
        let data = serde_json::to_vec_pretty(entries)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        write_atomically(&self.path, &data).await
    }
}

fn parent_dir(path: &Path) -> StorageResult<PathBuf> {
    match path.parent() {
        Some(dir) if dir.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Some(dir) => Ok(dir.to_path_buf()),
        None => Err(StorageError::InvalidPath(format!(
            "{} has no parent directory",
            path.display()
        ))),
    }
}

async fn write_atomically(path: &Path, data: &[u8]) -> StorageResult<()> {
    let dir = parent_dir(path)?;
    let temp_file = NamedTempFile::new_in(&dir)?;
    let temp_path = temp_file.into_temp_path();

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    temp_path
        .persist(path)
        .map_err(|e| StorageError::Io(e.error))?;
    Ok(())
}

#[async_trait]
impl Memory for FileMemory {
    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.cache.snapshot();
        entries.insert(key.to_string(), value.clone());
        self.persist(&entries).await?;
        self.cache.set(key, value).await
    }

    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.cache.get(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<bool> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.cache.snapshot();
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries).await?;
        self.cache.delete(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.cache.keys().await
    }

    async fn close(&self) -> StorageResult<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(&self.cache.snapshot()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.json");

        let storage = Storage::new(Arc::new(FileMemory::open(&path).await.unwrap()));
        storage.set("sky", "blue").await.unwrap();
        storage.set("grass", "green").await.unwrap();
        assert!(storage.delete("grass").await.unwrap());
        storage.close().await.unwrap();

        let reopened = Storage::new(Arc::new(FileMemory::open(&path).await.unwrap()));
        assert_eq!(reopened.keys().await.unwrap(), vec!["sky"]);
        assert_eq!(
            reopened.get::<String>("sky").await.unwrap(),
            Some("blue".to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_store() {
        let dir = tempdir().unwrap();
        let memory = FileMemory::open(dir.path().join("fresh.json")).await.unwrap();
        assert!(memory.keys().await.unwrap().is_empty());
        assert!(!dir.path().join("fresh.json").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileMemory::open(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::DeserializationError(_)));
    }

    #[tokio::test]
    async fn test_no_temporary_files_left_behind() {
        let dir = tempdir().unwrap();
        let memory = FileMemory::open(dir.path().join("memory.json")).await.unwrap();
        for i in 0..5u8 {
            memory.set(&format!("k{i}"), vec![i]).await.unwrap();
        }
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_store_unchanged() {
        let dir = tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let memory = FileMemory::open(store_dir.join("memory.json")).await.unwrap();
        memory.set("kept", b"1".to_vec()).await.unwrap();

        std::fs::remove_dir_all(&store_dir).unwrap();

        let err = memory.set("lost", b"2".to_vec()).await.unwrap_err();
        assert!(matches!(err, StorageError::Io(_)));
        assert_eq!(memory.get("lost").await.unwrap(), None);

        assert!(memory.delete("kept").await.is_err());
        assert_eq!(memory.get("kept").await.unwrap(), Some(b"1".to_vec()));
        assert_eq!(memory.keys().await.unwrap(), vec!["kept"]);
    }
}
