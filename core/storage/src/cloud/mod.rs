//! Cloud object and blob store backends.
//!
//! S3, MinIO and Azure share one adapter implementation, [`CloudAdapter`],
//! built on the `object_store` crate. Each backend contributes a
//! [`CloudFlavor`] that knows how to build its client from configuration and
//! credentials, and how to form public URLs.

mod azure;
mod minio;
mod s3;
mod store;

pub use azure::Azure;
pub use minio::Minio;
pub use s3::S3;
pub use store::CloudAdapter;

use object_store::signer::Signer;
use object_store::ObjectStore;

use perceptra_common::{AdapterConfig, Credentials, Result};

/// S3 storage adapter.
pub type S3Adapter = CloudAdapter<S3>;

/// MinIO / S3-compatible storage adapter.
pub type MinioAdapter = CloudAdapter<Minio>;

/// Azure Blob Storage adapter.
pub type AzureAdapter = CloudAdapter<Azure>;

/// Backend-specific half of a cloud adapter.
pub trait CloudFlavor: Send + Sync + 'static {
    /// Client type; must support signing for temporary access.
    type Store: ObjectStore + Signer;

    /// Identifier the adapter is registered under.
    const BACKEND: &'static str;

    /// Options that must be present and non-empty.
    const REQUIRED_OPTIONS: &'static [&'static str];

    /// Name of the bucket or container option.
    const SCOPE_OPTION: &'static str;

    /// Build the client. No network I/O happens here.
    ///
    /// # Errors
    /// - `Connection` if the client cannot be built from the given settings
    fn build(config: &AdapterConfig, credentials: &Credentials) -> Result<Self::Store>;

    /// Public locator for `key`. Reachability is not checked.
    fn public_url(config: &AdapterConfig, key: &str) -> Option<String>;
}

/// Prefix `endpoint` with a scheme if it has none.
pub(crate) fn with_scheme(endpoint: &str, secure: bool) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if secure {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}
