//! Local filesystem storage adapter.
//!
//! Every key resolves to a path under one base directory. Keys that are
//! absolute, contain an empty, `.` or `..` segment, or reach into the
//! staging directory are rejected before the filesystem is touched. Content type and user metadata are kept in a JSON sidecar next
//! to the content file (`<file>.meta`); sidecars are deleted with their
//! object and never listed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::adapter::{
    describe, write_destination, AccessMethod, ConfigurableAdapter, PresignedUrl, StorageAdapter,
    StorageObject, UploadOptions,
};
use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

/// Suffix appended to a content file name to form its sidecar.
pub const SIDECAR_SUFFIX: &str = ".meta";

/// Directory under the root holding temp files and connection checks.
/// No key may name it, so nothing in it is ever an object.
pub const STAGING_DIR: &str = ".perceptra-staging";

/// Sidecar record stored next to a content file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Local filesystem storage adapter.
///
/// Configuration:
/// - `base_path` (required): base directory for stored objects
/// - `create_dirs` (default `true`): create the base directory if missing
///
/// No credentials are used.
pub struct LocalAdapter {
    config: AdapterConfig,
    root: PathBuf,
}

impl LocalAdapter {
    /// Create a local adapter rooted at `base_path`, creating it if needed.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let config = AdapterConfig::new().with(
            "base_path",
            base_path.as_ref().to_string_lossy().into_owned(),
        );
        Self::from_config(config, Credentials::new())
    }

    /// Canonical base directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Prepare the base directory.
    ///
    /// # Errors
    /// - `Connection` if the directory is missing and may not be created,
    ///   or is not a directory
    /// - `PermissionDenied` if the directory is read-only
    fn init_root(base_path: &str, create_dirs: bool) -> Result<PathBuf> {
        let root = PathBuf::from(base_path);

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            if !create_dirs {
                return Err(StorageError::connection(format!(
                    "Base path does not exist: {}",
                    root.display()
                )));
            }
            std::fs::create_dir_all(&root).map_err(|e| {
                StorageError::connection(format!(
                    "Local storage initialization failed: {}",
                    root.display()
                ))
                .with_source(e)
            })?;
            info!("Created base directory: {}", root.display());
        }

        let root = root.canonicalize().map_err(|e| {
            StorageError::connection(format!("Failed to resolve base path: {}", base_path))
                .with_source(e)
        })?;

        let fs_meta = std::fs::metadata(&root).map_err(|e| {
            StorageError::connection(format!("Cannot access base path: {}", root.display()))
                .with_source(e)
        })?;

        if !fs_meta.is_dir() {
            return Err(StorageError::connection(format!(
                "Base path is not a directory: {}",
                root.display()
            )));
        }

        if fs_meta.permissions().readonly() {
            return Err(StorageError::permission_denied(format!(
                "No write permission for base path: {}",
                root.display()
            )));
        }

        Ok(root)
    }

    /// Resolve a key to a filesystem path under the base directory.
    ///
    /// # Errors
    /// - `Operation` if the key is empty, absolute, has an empty, `.` or `..`
    ///   segment (including a trailing separator), names a sidecar, or starts
    ///   in the staging directory
    pub fn resolve_key(&self, key: &str) -> Result<PathBuf> {
        let invalid = |reason: &str| StorageError::operation(format!("Invalid key {:?}: {}", key, reason));

        if key.is_empty() {
            return Err(invalid("key cannot be empty"));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(invalid("absolute paths are not allowed"));
        }
        if key.ends_with(SIDECAR_SUFFIX) {
            return Err(invalid("reserved metadata suffix"));
        }

        let mut fs_path = self.root.clone();
        let mut depth = 0usize;

        // Backslashes are separators on some platforms; treat them as such everywhere.
        for (index, segment) in key.split(['/', '\\']).enumerate() {
            match segment {
                "" => return Err(invalid("empty path segment")),
                "." => return Err(invalid("'.' segments are not allowed")),
                ".." => return Err(invalid("parent directory traversal is not allowed")),
                STAGING_DIR if index == 0 => return Err(invalid("reserved staging directory")),
                _ => {}
            }

            for component in Path::new(segment).components() {
                match component {
                    Component::Normal(part) => {
                        fs_path.push(part);
                        depth += 1;
                    }
                    Component::CurDir => {}
                    Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                        return Err(invalid("absolute paths are not allowed"));
                    }
                }
            }
        }

        if depth == 0 {
            return Err(invalid("key does not name a file"));
        }

        Ok(fs_path)
    }

    fn sidecar_path(fs_path: &Path) -> PathBuf {
        let mut name = fs_path.as_os_str().to_os_string();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    /// Convert a filesystem path below the root back into a key.
    fn key_for(&self, fs_path: &Path) -> Option<String> {
        let relative = fs_path.strip_prefix(&self.root).ok()?;
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        Some(parts?.join("/"))
    }

    async fn read_sidecar(fs_path: &Path) -> Result<Option<Sidecar>> {
        match fs::read(Self::sidecar_path(fs_path)).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::operation("Failed to read metadata sidecar").with_source(e)),
        }
    }

    async fn remove_sidecar(fs_path: &Path) -> Result<()> {
        match fs::remove_file(Self::sidecar_path(fs_path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(e, "Failed to remove metadata sidecar")),
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Fresh path inside the staging directory, creating the directory if needed.
    async fn staging_file(&self, label: &str) -> io::Result<PathBuf> {
        let staging = self.staging_dir();
        fs::create_dir_all(&staging).await?;
        Ok(staging.join(format!("{}-{}", label, Uuid::new_v4())))
    }

    /// Write `data` to a staging file and rename it into place.
    async fn write_atomic(&self, target: &Path, data: &[u8]) -> io::Result<()> {
        let tmp = self.staging_file("upload").await?;

        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, target).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    fn create_object(&self, key: &str, fs_meta: &std::fs::Metadata) -> StorageObject {
        let modified: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        StorageObject::new(key, fs_meta.len(), modified)
    }

    /// Collect content files below `dir`, skipping sidecars and the staging directory.
    async fn walk(&self, dir: &Path, files: &mut Vec<(String, std::fs::Metadata)>) -> Result<()> {
        let staging = self.staging_dir();
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(_) if !current.is_dir() => continue,
                Err(e) => return Err(map_io(e, "Local list operation failed")),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| map_io(e, "Local list operation failed"))?
            {
                let entry_path = entry.path();
                let fs_meta = entry
                    .metadata()
                    .await
                    .map_err(|e| map_io(e, "Local list operation failed"))?;

                if fs_meta.is_dir() {
                    if entry_path != staging {
                        pending.push(entry_path);
                    }
                    continue;
                }

                if entry.file_name().to_string_lossy().ends_with(SIDECAR_SUFFIX) {
                    continue;
                }

                if let Some(key) = self.key_for(&entry_path) {
                    files.push((key, fs_meta));
                }
            }
        }

        Ok(())
    }
}

/// Map an io error, keeping the not-found and permission kinds.
fn map_io(err: io::Error, context: &str) -> StorageError {
    let mapped = match err.kind() {
        io::ErrorKind::NotFound => StorageError::not_found(context.to_string()),
        io::ErrorKind::PermissionDenied => StorageError::permission_denied(context.to_string()),
        _ => StorageError::operation(format!("{}: {}", context, err)),
    };
    mapped.with_source(err)
}

impl fmt::Debug for LocalAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, Self::BACKEND, &self.config)
    }
}

impl ConfigurableAdapter for LocalAdapter {
    const BACKEND: &'static str = "local";
    const REQUIRED_OPTIONS: &'static [&'static str] = &["base_path"];

    fn validate_config(config: &AdapterConfig) -> Result<()> {
        config.require_str("base_path").map_err(|_| {
            StorageError::invalid_config("local adapter requires non-empty 'base_path' in config")
        })?;
        config.get_bool("create_dirs", true)?;
        Ok(())
    }

    fn from_config(config: AdapterConfig, _credentials: Credentials) -> Result<Self> {
        Self::validate_config(&config)?;

        let base_path = config.require_str("base_path")?;
        let create_dirs = config.get_bool("create_dirs", true)?;
        let root = Self::init_root(base_path, create_dirs)?;

        Ok(Self { config, root })
    }
}

#[async_trait]
impl StorageAdapter for LocalAdapter {
    fn name(&self) -> &str {
        Self::BACKEND
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn test_connection(&self, timeout: Duration) -> Result<bool> {
        let check_file = self.staging_dir().join(format!("connection-{}", Uuid::new_v4()));

        let outcome = tokio::time::timeout(timeout, async {
            fs::create_dir_all(self.staging_dir()).await?;
            fs::write(&check_file, b"test").await?;
            fs::remove_file(&check_file).await
        })
        .await;

        match outcome {
            Ok(Ok(())) => {
                info!("Successfully verified local storage at: {}", self.root.display());
                Ok(true)
            }
            Ok(Err(e)) => {
                let _ = fs::remove_file(&check_file).await;
                let message = format!("Local storage test failed: {}", self.root.display());
                Err(match e.kind() {
                    io::ErrorKind::PermissionDenied => StorageError::permission_denied(message),
                    _ => StorageError::connection(message),
                }
                .with_source(e))
            }
            Err(elapsed) => {
                let _ = fs::remove_file(&check_file).await;
                Err(StorageError::connection(format!(
                    "Local storage test timed out after {:?}",
                    timeout
                ))
                .with_source(elapsed))
            }
        }
    }

    async fn upload(&self, key: &str, data: Vec<u8>, options: UploadOptions) -> Result<String> {
        let fs_path = self.resolve_key(key)?;

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io(e, "Local upload failed"))?;
        }

        self.write_atomic(&fs_path, &data)
            .await
            .map_err(|e| map_io(e, "Local upload failed"))?;

        if options.is_empty() {
            // A re-upload starts a new lifecycle; stale attributes must not survive it.
            Self::remove_sidecar(&fs_path).await?;
        } else {
            let sidecar = Sidecar {
                content_type: options.content_type,
                metadata: options.metadata.unwrap_or_default(),
            };
            let raw = serde_json::to_vec(&sidecar)?;
            self.write_atomic(&Self::sidecar_path(&fs_path), &raw)
                .await
                .map_err(|e| map_io(e, "Failed to write metadata sidecar"))?;
        }

        info!("Uploaded file to local storage: {}", fs_path.display());
        Ok(key.to_string())
    }

    async fn download(&self, key: &str, destination: Option<&Path>) -> Result<Vec<u8>> {
        let fs_path = self.resolve_key(key)?;

        let data = match fs::read(&fs_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!("File not found: {}", key)).with_source(e));
            }
            Err(e) if fs_path.is_dir() => {
                return Err(StorageError::not_found(format!("File not found: {}", key)).with_source(e));
            }
            Err(e) => return Err(map_io(e, "Local download failed")),
        };

        if let Some(destination) = destination {
            write_destination(destination, &data).await?;
            info!("Downloaded file to: {}", destination.display());
        } else {
            debug!("Downloaded file: {}", key);
        }

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let fs_path = self.resolve_key(key)?;

        if fs_path.is_dir() {
            return Err(StorageError::not_found(format!("File not found: {}", key)));
        }

        // Sidecar first: a failure here leaves the object intact.
        Self::remove_sidecar(&fs_path).await?;

        match fs::remove_file(&fs_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!("File not found: {}", key)).with_source(e));
            }
            Err(e) => return Err(map_io(e, "Local delete failed")),
        }

        info!("Deleted file: {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let fs_path = self.resolve_key(key)?;

        match fs::metadata(&fs_path).await {
            Ok(fs_meta) => Ok(fs_meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(map_io(e, "Local exists check failed")),
        }
    }

    async fn metadata(&self, key: &str) -> Result<StorageObject> {
        let fs_path = self.resolve_key(key)?;

        let fs_meta = match fs::metadata(&fs_path).await {
            Ok(fs_meta) if fs_meta.is_file() => fs_meta,
            Ok(_) => return Err(StorageError::not_found(format!("File not found: {}", key))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StorageError::not_found(format!("File not found: {}", key)).with_source(e));
            }
            Err(e) => return Err(map_io(e, "Local metadata retrieval failed")),
        };

        let data = fs::read(&fs_path)
            .await
            .map_err(|e| map_io(e, "Local metadata retrieval failed"))?;
        let etag = format!("{:x}", md5::compute(&data));

        let sidecar = Self::read_sidecar(&fs_path).await?.unwrap_or_default();
        let content_type = sidecar
            .content_type
            .or_else(|| mime_guess::from_path(&fs_path).first().map(|m| m.to_string()));

        Ok(self
            .create_object(key, &fs_meta)
            .with_etag(etag)
            .with_content_type(content_type)
            .with_metadata(sidecar.metadata))
    }

    async fn list(&self, prefix: &str, max_results: usize) -> Result<Vec<StorageObject>> {
        // Only descend into the directory part of the prefix.
        let search_dir = match prefix.rfind('/') {
            Some(idx) if !prefix[..idx].is_empty() => {
                match self.resolve_dir(&prefix[..idx]) {
                    Some(dir) => dir,
                    None => return Ok(Vec::new()),
                }
            }
            _ => self.root.clone(),
        };

        let mut files = Vec::new();
        self.walk(&search_dir, &mut files).await?;

        files.retain(|(key, _)| key.starts_with(prefix));
        files.sort_by(|a, b| a.0.cmp(&b.0));
        files.truncate(max_results);

        let objects: Vec<StorageObject> = files
            .iter()
            .map(|(key, fs_meta)| {
                self.create_object(key, fs_meta)
                    .with_content_type(mime_guess::from_path(key).first().map(|m| m.to_string()))
            })
            .collect();

        debug!(
            "Listed {} files from local storage with prefix: {}",
            objects.len(),
            prefix
        );
        Ok(objects)
    }

    /// Local storage cannot issue delegated access. The returned `file://`
    /// URL only works on this machine and expiry is not enforced.
    ///
    /// The key must already exist for every method, `Put` included: a
    /// `file://` URL cannot accept an upload, so it is only ever a locator
    /// for a stored object.
    ///
    /// # Errors
    /// - `NotFound` if no object is stored under `key`, whatever the method
    async fn presigned_url(
        &self,
        key: &str,
        expires_in: Duration,
        method: AccessMethod,
    ) -> Result<PresignedUrl> {
        let fs_path = self.resolve_key(key)?;

        if !fs::metadata(&fs_path).await.map(|m| m.is_file()).unwrap_or(false) {
            return Err(StorageError::not_found(format!("File not found: {}", key)));
        }

        let url = Url::from_file_path(&fs_path).map_err(|_| {
            StorageError::operation(format!("Cannot build file URL for {}", fs_path.display()))
        })?;

        warn!("Local storage presigned URLs are file:// URLs and only work locally");
        Ok(PresignedUrl::expiring_in(url.to_string(), expires_in, method))
    }

    fn public_url(&self, key: &str) -> Option<String> {
        let fs_path = self.resolve_key(key).ok()?;
        Url::from_file_path(fs_path).ok().map(|u| u.to_string())
    }
}

impl LocalAdapter {
    /// Resolve a directory prefix, ignoring prefixes that could not be keys.
    fn resolve_dir(&self, dir: &str) -> Option<PathBuf> {
        if dir.starts_with('/') || dir.split(['/', '\\']).any(|s| s == ".." || s == ".") {
            return None;
        }
        if dir.split(['/', '\\']).next() == Some(STAGING_DIR) {
            return None;
        }
        let mut path = self.root.clone();
        for segment in dir.split('/').filter(|s| !s.is_empty() && *s != ".") {
            path.push(segment);
        }
        Some(path)
    }
}
