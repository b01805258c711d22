use object_store::aws::{AmazonS3, AmazonS3Builder};

use super::{with_scheme, CloudFlavor};
use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

/// MinIO and other S3-compatible servers, addressed path-style.
///
/// Configuration:
/// - `bucket_name`, `endpoint_url` (required); the endpoint may omit the
///   scheme, e.g. `play.min.io:9000`
/// - `secure` (default `true`): use HTTPS when the endpoint has no scheme
/// - `region` (optional)
///
/// Credentials: `access_key`, `secret_key`. Requests are unsigned without
/// them.
#[derive(Debug)]
pub struct Minio;

fn endpoint(config: &AdapterConfig) -> Result<String> {
    let secure = config.get_bool("secure", true)?;
    Ok(with_scheme(config.require_str("endpoint_url")?, secure))
}

impl CloudFlavor for Minio {
    type Store = AmazonS3;

    const BACKEND: &'static str = "minio";
    const REQUIRED_OPTIONS: &'static [&'static str] = &["bucket_name", "endpoint_url"];
    const SCOPE_OPTION: &'static str = "bucket_name";

    fn build(config: &AdapterConfig, credentials: &Credentials) -> Result<AmazonS3> {
        let endpoint = endpoint(config)?;
        let region = config
            .get_str("region")
            .filter(|r| !r.trim().is_empty())
            .unwrap_or("us-east-1");

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(config.require_str("bucket_name")?)
            .with_region(region)
            .with_allow_http(endpoint.starts_with("http://"))
            .with_virtual_hosted_style_request(false)
            .with_endpoint(endpoint);

        match (credentials.get("access_key"), credentials.get("secret_key")) {
            (Some(access_key), Some(secret_key)) => {
                builder = builder
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key);
            }
            _ => builder = builder.with_skip_signature(true),
        }

        builder.build().map_err(|e| {
            StorageError::connection("MinIO client initialization failed").with_source(e)
        })
    }

    fn public_url(config: &AdapterConfig, key: &str) -> Option<String> {
        let endpoint = endpoint(config).ok()?;
        let bucket = config.get_str("bucket_name")?;
        Some(format!("{}/{}/{}", endpoint, bucket, key))
    }
}
