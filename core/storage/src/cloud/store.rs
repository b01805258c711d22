//! Adapter shared by every `object_store` backed backend.

use async_trait::async_trait;
use futures::StreamExt;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectStore, PutOptions, PutPayload,
};
use reqwest::Method;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::CloudFlavor;
use crate::adapter::{
    describe, write_destination, AccessMethod, ConfigurableAdapter, PresignedUrl, StorageAdapter,
    StorageObject, UploadOptions,
};
use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

/// Storage adapter over an `object_store` client.
pub struct CloudAdapter<F: CloudFlavor> {
    config: AdapterConfig,
    store: F::Store,
    scope: String,
    _flavor: PhantomData<F>,
}

impl<F: CloudFlavor> CloudAdapter<F> {
    /// Bucket or container this adapter is bound to.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn object_path(&self, key: &str) -> Result<ObjectPath> {
        if key.is_empty() {
            return Err(StorageError::operation("Key cannot be empty"));
        }
        ObjectPath::parse(key).map_err(|e| {
            StorageError::operation(format!("Invalid key {:?}", key)).with_source(e)
        })
    }

    fn failure(&self, context: &str, err: object_store::Error) -> StorageError {
        map_store_error(err, &format!("{} {} failed", F::BACKEND, context))
    }
}

/// Map an `object_store` error onto the storage taxonomy.
pub(crate) fn map_store_error(err: object_store::Error, context: &str) -> StorageError {
    let mapped = match &err {
        object_store::Error::NotFound { path, .. } => {
            StorageError::not_found(format!("File not found: {}", path))
        }
        object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. } => {
            StorageError::permission_denied(format!("{}: {}", context, err))
        }
        _ => StorageError::operation(format!("{}: {}", context, err)),
    };
    mapped.with_source(err)
}

pub(crate) fn http_method(method: AccessMethod) -> Method {
    match method {
        AccessMethod::Get => Method::GET,
        AccessMethod::Put => Method::PUT,
        AccessMethod::Delete => Method::DELETE,
    }
}

fn attribute_text(value: &AttributeValue) -> String {
    let text: &str = value;
    text.to_owned()
}

impl<F: CloudFlavor> fmt::Debug for CloudAdapter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, F::BACKEND, &self.config)
    }
}

impl<F: CloudFlavor> ConfigurableAdapter for CloudAdapter<F> {
    const BACKEND: &'static str = F::BACKEND;
    const REQUIRED_OPTIONS: &'static [&'static str] = F::REQUIRED_OPTIONS;

    fn from_config(config: AdapterConfig, credentials: Credentials) -> Result<Self> {
        Self::validate_config(&config)?;

        let scope = config.require_str(F::SCOPE_OPTION)?.to_string();
        let store = F::build(&config, &credentials)?;
        debug!("Initialized {} client for {}", F::BACKEND, scope);

        Ok(Self {
            config,
            store,
            scope,
            _flavor: PhantomData,
        })
    }
}

#[async_trait]
impl<F: CloudFlavor> StorageAdapter for CloudAdapter<F> {
    fn name(&self) -> &str {
        F::BACKEND
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn test_connection(&self, timeout: Duration) -> Result<bool> {
        let probe = tokio::time::timeout(timeout, self.store.list_with_delimiter(None)).await;

        match probe {
            Ok(Ok(_)) => {
                info!("Successfully connected to {} scope: {}", F::BACKEND, self.scope);
                Ok(true)
            }
            Ok(Err(err)) => {
                let mapped = match &err {
                    object_store::Error::NotFound { .. } => StorageError::connection(format!(
                        "{} scope '{}' does not exist",
                        F::BACKEND,
                        self.scope
                    )),
                    object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. } => {
                        StorageError::permission_denied(format!(
                            "Access denied to {} scope '{}'",
                            F::BACKEND,
                            self.scope
                        ))
                    }
                    _ => StorageError::connection(format!("{} connection failed: {}", F::BACKEND, err)),
                };
                Err(mapped.with_source(err))
            }
            Err(elapsed) => Err(StorageError::connection(format!(
                "{} connection timed out after {:?}",
                F::BACKEND,
                timeout
            ))
            .with_source(elapsed)),
        }
    }

    async fn upload(&self, key: &str, data: Vec<u8>, options: UploadOptions) -> Result<String> {
        let path = self.object_path(key)?;

        let mut attributes = Attributes::new();
        if let Some(content_type) = options.content_type {
            attributes.insert(Attribute::ContentType, content_type.into());
        }
        for (name, value) in options.metadata.unwrap_or_default() {
            attributes.insert(Attribute::Metadata(name.into()), value.into());
        }

        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&path, PutPayload::from(data), opts)
            .await
            .map_err(|e| self.failure("upload", e))?;

        info!("Uploaded file to {}: {}/{}", F::BACKEND, self.scope, key);
        Ok(key.to_string())
    }

    async fn download(&self, key: &str, destination: Option<&Path>) -> Result<Vec<u8>> {
        let path = self.object_path(key)?;

        let result = self
            .store
            .get(&path)
            .await
            .map_err(|e| self.failure("download", e))?;
        let data = result
            .bytes()
            .await
            .map_err(|e| self.failure("download", e))?
            .to_vec();

        if let Some(destination) = destination {
            write_destination(destination, &data).await?;
            info!("Downloaded file to: {}", destination.display());
        }

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;

        // Object stores delete absent keys silently.
        self.store
            .head(&path)
            .await
            .map_err(|e| self.failure("delete", e))?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| self.failure("delete", e))?;

        info!("Deleted file from {}: {}/{}", F::BACKEND, self.scope, key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;

        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(self.failure("exists check", e)),
        }
    }

    async fn metadata(&self, key: &str) -> Result<StorageObject> {
        let path = self.object_path(key)?;

        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(&path, options)
            .await
            .map_err(|e| self.failure("metadata retrieval", e))?;

        let content_type = result
            .attributes
            .get(&Attribute::ContentType)
            .map(attribute_text);
        let metadata: HashMap<String, String> = result
            .attributes
            .iter()
            .filter_map(|(attribute, value)| match attribute {
                Attribute::Metadata(name) => Some((name.to_string(), attribute_text(value))),
                _ => None,
            })
            .collect();

        let meta = result.meta;
        let mut object = StorageObject::new(key, meta.size, meta.last_modified)
            .with_content_type(content_type)
            .with_metadata(metadata);
        if let Some(etag) = meta.e_tag {
            object = object.with_etag(etag.trim_matches('"'));
        }

        Ok(object)
    }

    async fn list(&self, prefix: &str, max_results: usize) -> Result<Vec<StorageObject>> {
        // Narrow the listing to the directory part of the prefix.
        let dir = match prefix.rfind('/').map(|idx| &prefix[..idx]) {
            Some(dir) if !dir.is_empty() => match ObjectPath::parse(dir) {
                Ok(dir) => Some(dir),
                Err(_) => return Ok(Vec::new()),
            },
            _ => None,
        };

        let mut stream = self.store.list(dir.as_ref());
        let mut objects = Vec::new();

        while objects.len() < max_results {
            let Some(item) = stream.next().await else {
                break;
            };
            let meta = item.map_err(|e| self.failure("list", e))?;

            let key = meta.location.to_string();
            if !key.starts_with(prefix) {
                continue;
            }

            let mut object = StorageObject::new(key, meta.size, meta.last_modified);
            if let Some(etag) = meta.e_tag {
                object = object.with_etag(etag.trim_matches('"'));
            }
            objects.push(object);
        }

        debug!(
            "Listed {} objects from {} with prefix: {}",
            objects.len(),
            F::BACKEND,
            prefix
        );
        Ok(objects)
    }

    /// Existence is not verified; a URL for a missing key is valid but
    /// fails when used.
    async fn presigned_url(
        &self,
        key: &str,
        expires_in: Duration,
        method: AccessMethod,
    ) -> Result<PresignedUrl> {
        let path = self.object_path(key)?;

        let url = self
            .store
            .signed_url(http_method(method), &path, expires_in)
            .await
            .map_err(|e| self.failure("presigned URL generation", e))?;

        Ok(PresignedUrl::expiring_in(url.to_string(), expires_in, method))
    }

    fn public_url(&self, key: &str) -> Option<String> {
        F::public_url(&self.config, key)
    }
}
