//! Storage adapter trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

/// Metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageObject {
    /// Backend-relative key of the object.
    pub key: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, assigned by the backend on upload.
    pub last_modified: DateTime<Utc>,
    /// Content fingerprint, if the backend provides one.
    pub etag: Option<String>,
    /// MIME type.
    pub content_type: Option<String>,
    /// Caller-supplied metadata.
    pub metadata: Option<HashMap<String, String>>,
}

impl StorageObject {
    pub fn new(key: impl Into<String>, size: u64, last_modified: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            size,
            last_modified,
            etag: None,
            content_type: None,
            metadata: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    /// Attach user metadata. An empty map is stored as `None`.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        };
        self
    }
}

/// HTTP-style verb a temporary access grant authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccessMethod {
    #[default]
    Get,
    Put,
    Delete,
}

impl AccessMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMethod::Get => "GET",
            AccessMethod::Put => "PUT",
            AccessMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for AccessMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessMethod {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(AccessMethod::Get),
            "PUT" => Ok(AccessMethod::Put),
            "DELETE" => Ok(AccessMethod::Delete),
            _ => Err(StorageError::operation(format!(
                "Unsupported HTTP method: {}",
                s
            ))),
        }
    }
}

/// Time-bounded access grant for a single object.
///
/// Expiry is not enforced locally; callers treat the URL as unusable after
/// `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresignedUrl {
    /// Backend-specific locator. Not necessarily a network URL.
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub method: AccessMethod,
}

impl PresignedUrl {
    /// Build a descriptor that expires `expires_in` from now.
    pub fn expiring_in(url: impl Into<String>, expires_in: Duration, method: AccessMethod) -> Self {
        let expires_in = chrono::Duration::from_std(expires_in).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(expires_in)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            url: url.into(),
            expires_at,
            method,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Optional attributes stored alongside uploaded content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

impl UploadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// True when neither a content type nor any metadata entry is set.
    pub fn is_empty(&self) -> bool {
        self.content_type.is_none() && self.metadata.as_ref().map_or(true, HashMap::is_empty)
    }
}

/// Byte stream type for upload operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Storage adapter trait for different backends.
///
/// Every backend translates its native failures into one of the
/// [`StorageError`] kinds; no backend-specific error crosses this boundary.
/// Implementations hold no per-call state, so operations on distinct keys
/// may run concurrently on one instance.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Backend identifier (e.g., "local", "s3", "remote").
    fn name(&self) -> &str;

    /// Configuration the adapter was built from.
    fn config(&self) -> &AdapterConfig;

    /// Probe the backend and the configured bucket, container or directory.
    ///
    /// Must not change stored state. Any probe artifact is removed before
    /// returning.
    ///
    /// # Errors
    /// - `Connection` if the backend or storage scope is unreachable
    /// - `PermissionDenied` if access to the storage scope is refused
    async fn test_connection(&self, timeout: Duration) -> Result<bool>;

    /// Upload data under `key`, replacing any existing object.
    ///
    /// # Postconditions
    /// - Returns the key the data was stored under
    /// - `last_modified` and `etag` are assigned by the backend
    ///
    /// # Errors
    /// - `PermissionDenied`
    /// - `Operation` for any other failure
    async fn upload(&self, key: &str, data: Vec<u8>, options: UploadOptions) -> Result<String>;

    /// Upload data as a stream.
    ///
    /// The default implementation collects the stream and delegates to
    /// [`StorageAdapter::upload`].
    async fn upload_stream(
        &self,
        key: &str,
        mut stream: ByteStream,
        options: UploadOptions,
    ) -> Result<String> {
        let mut data = Vec::new();

        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }

        self.upload(key, data, options).await
    }

    /// Download the full content of `key`.
    ///
    /// If `destination` is given the content is also written there; the
    /// returned bytes equal the persisted bytes.
    ///
    /// # Errors
    /// - `NotFound` if the key does not exist
    async fn download(&self, key: &str, destination: Option<&Path>) -> Result<Vec<u8>>;

    /// Delete the object at `key` together with any side artifacts.
    ///
    /// # Errors
    /// - `NotFound` if the key does not exist; deleting an absent key is an
    ///   error, not a no-op
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether `key` exists. Never fails with `NotFound`.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get metadata for `key`.
    ///
    /// # Errors
    /// - `NotFound` if the key does not exist
    async fn metadata(&self, key: &str) -> Result<StorageObject>;

    /// List objects whose key starts with `prefix`, at most `max_results`.
    ///
    /// An empty prefix lists everything. An empty result is not an error.
    async fn list(&self, prefix: &str, max_results: usize) -> Result<Vec<StorageObject>>;

    /// Generate a temporary access URL for `key`.
    ///
    /// Backends that cannot issue delegated network access may return a
    /// backend-local locator instead.
    async fn presigned_url(
        &self,
        key: &str,
        expires_in: Duration,
        method: AccessMethod,
    ) -> Result<PresignedUrl>;

    /// Public locator for `key`, if the backend has such a notion.
    ///
    /// Reachability and existence are not verified.
    fn public_url(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Construction half of the adapter contract.
///
/// Registering a type with the registry goes through this trait, so only
/// types satisfying [`StorageAdapter`] can be registered.
pub trait ConfigurableAdapter: StorageAdapter + Sized + 'static {
    /// Identifier the adapter is registered under by default.
    const BACKEND: &'static str;

    /// Options that must be present and non-empty.
    const REQUIRED_OPTIONS: &'static [&'static str];

    /// Validate configuration without performing any I/O.
    ///
    /// # Errors
    /// - `InvalidConfig` if a required option is absent or empty
    fn validate_config(config: &AdapterConfig) -> Result<()> {
        for key in Self::REQUIRED_OPTIONS {
            config.require_str(key).map_err(|_| {
                StorageError::invalid_config(format!(
                    "{} adapter requires non-empty '{}' in config",
                    Self::BACKEND,
                    key
                ))
            })?;
        }
        Ok(())
    }

    /// Validate `config`, then build the adapter and its backend client.
    fn from_config(config: AdapterConfig, credentials: Credentials) -> Result<Self>;
}

impl fmt::Debug for dyn StorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, self.name(), self.config())
    }
}

/// Diagnostic form shared by every adapter. Credentials are never included.
pub(crate) fn describe(f: &mut fmt::Formatter<'_>, name: &str, config: &AdapterConfig) -> fmt::Result {
    write!(f, "<{} config_keys={:?}>", name, config.keys())
}

/// Persist downloaded content to a caller-supplied destination.
pub(crate) async fn write_destination(destination: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::operation(format!(
                    "Failed to create destination directory {}",
                    parent.display()
                ))
                .with_source(e)
            })?;
        }
    }

    tokio::fs::write(destination, data).await.map_err(|e| {
        StorageError::operation(format!(
            "Failed to write destination {}",
            destination.display()
        ))
        .with_source(e)
    })
}
