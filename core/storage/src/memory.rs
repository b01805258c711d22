//! In-memory storage adapter for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::adapter::{
    describe, write_destination, AccessMethod, ConfigurableAdapter, PresignedUrl, StorageAdapter,
    StorageObject, UploadOptions,
};
use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

/// In-memory storage entry.
#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    object: StorageObject,
}

/// In-memory storage adapter.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Temporary access descriptors use a `memory://`
/// locator that only this process understands.
pub struct MemoryAdapter {
    config: AdapterConfig,
    storage: Arc<RwLock<BTreeMap<String, Entry>>>,
}

impl MemoryAdapter {
    /// Create a new empty memory adapter.
    pub fn new() -> Self {
        Self {
            config: AdapterConfig::new(),
            storage: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Entry>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Entry>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::operation("Key cannot be empty"));
        }
        Ok(())
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, Self::BACKEND, &self.config)
    }
}

impl ConfigurableAdapter for MemoryAdapter {
    const BACKEND: &'static str = "memory";
    const REQUIRED_OPTIONS: &'static [&'static str] = &[];

    fn from_config(config: AdapterConfig, _credentials: Credentials) -> Result<Self> {
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            storage: Arc::new(RwLock::new(BTreeMap::new())),
        })
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn name(&self) -> &str {
        Self::BACKEND
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn test_connection(&self, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn upload(&self, key: &str, data: Vec<u8>, options: UploadOptions) -> Result<String> {
        Self::check_key(key)?;

        let mut storage = self.write();

        // Overwrites never move last_modified backwards.
        let now = Utc::now();
        let last_modified = storage
            .get(key)
            .map_or(now, |previous| previous.object.last_modified.max(now));

        let object = StorageObject::new(key, data.len() as u64, last_modified)
            .with_etag(format!("{:x}", md5::compute(&data)))
            .with_content_type(options.content_type)
            .with_metadata(options.metadata.unwrap_or_default());

        storage.insert(key.to_string(), Entry { data, object });
        info!("Uploaded object to memory: {}", key);
        Ok(key.to_string())
    }

    async fn download(&self, key: &str, destination: Option<&Path>) -> Result<Vec<u8>> {
        let data = self
            .read()
            .get(key)
            .map(|entry| entry.data.clone())
            .ok_or_else(|| StorageError::not_found(format!("File not found: {}", key)))?;

        if let Some(destination) = destination {
            write_destination(destination, &data).await?;
        }

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.write().remove(key) {
            Some(_) => {
                info!("Deleted object from memory: {}", key);
                Ok(())
            }
            None => Err(StorageError::not_found(format!("File not found: {}", key))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.read().contains_key(key))
    }

    async fn metadata(&self, key: &str) -> Result<StorageObject> {
        self.read()
            .get(key)
            .map(|entry| entry.object.clone())
            .ok_or_else(|| StorageError::not_found(format!("File not found: {}", key)))
    }

    async fn list(&self, prefix: &str, max_results: usize) -> Result<Vec<StorageObject>> {
        let objects: Vec<StorageObject> = self
            .read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(max_results)
            .map(|(_, entry)| entry.object.clone())
            .collect();

        debug!("Listed {} objects from memory with prefix: {}", objects.len(), prefix);
        Ok(objects)
    }

    /// Requires the key to exist for every method, `Put` included.
    async fn presigned_url(
        &self,
        key: &str,
        expires_in: Duration,
        method: AccessMethod,
    ) -> Result<PresignedUrl> {
        if !self.read().contains_key(key) {
            return Err(StorageError::not_found(format!("File not found: {}", key)));
        }

        Ok(PresignedUrl::expiring_in(
            format!("memory://{}", key),
            expires_in,
            method,
        ))
    }
}
