use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Errors raised by a settings store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings document is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Key-value persistence for engine settings.
///
/// This is the sync-storage seam: hosts that live inside a browser
/// extension adapt their storage area behind this trait; standalone hosts
/// and tests use the bundled implementations.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read a value, `None` when the key is absent
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write a value, replacing any existing one
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a key; removing an absent key is not an error
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently present
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Settings persisted as a single JSON document on disk.
///
/// The whole document is rewritten on every mutation; settings are tiny
/// and the simplicity buys crash consistency at the file level.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles against the document
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(path = %path.display(), "Creating JSON settings store");
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn read_document(&self) -> Result<Map<String, Value>, StoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_document(&self, doc: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(doc)?;
        fs::write(&self.path, raw).await?;
        debug!(path = %self.path.display(), "Saved settings document");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        doc.insert(key.to_string(), value);
        self.write_document(&doc).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read_document().await?;
        if doc.remove(key).is_some() {
            self.write_document(&doc).await?;
            info!(key, "Removed settings key");
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_document().await?.keys().cloned().collect())
    }
}

/// In-memory settings store for tests and hosts that persist elsewhere
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor used widely in tests
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.lock().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.values.lock().await.keys().cloned().collect())
    }
}
