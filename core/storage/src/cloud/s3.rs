use object_store::aws::{AmazonS3, AmazonS3Builder};

use super::CloudFlavor;
use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

const DEFAULT_REGION: &str = "us-east-1";

/// Amazon S3.
///
/// Configuration:
/// - `bucket_name` (required)
/// - `region` (default `us-east-1`)
/// - `endpoint_url`: custom endpoint for S3-compatible services
///
/// Credentials (optional; the default AWS provider chain applies without
/// them): `access_key_id`, `secret_access_key`, `session_token`.
#[derive(Debug)]
pub struct S3;

fn region(config: &AdapterConfig) -> &str {
    config
        .get_str("region")
        .filter(|r| !r.trim().is_empty())
        .unwrap_or(DEFAULT_REGION)
}

impl CloudFlavor for S3 {
    type Store = AmazonS3;

    const BACKEND: &'static str = "s3";
    const REQUIRED_OPTIONS: &'static [&'static str] = &["bucket_name"];
    const SCOPE_OPTION: &'static str = "bucket_name";

    fn build(config: &AdapterConfig, credentials: &Credentials) -> Result<AmazonS3> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(config.require_str("bucket_name")?)
            .with_region(region(config));

        if let Some(endpoint) = config.get_str("endpoint_url").filter(|e| !e.is_empty()) {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        if let (Some(key_id), Some(secret)) = (
            credentials.get("access_key_id"),
            credentials.get("secret_access_key"),
        ) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
            if let Some(token) = credentials.get("session_token") {
                builder = builder.with_token(token);
            }
        }

        builder
            .build()
            .map_err(|e| StorageError::connection("S3 client initialization failed").with_source(e))
    }

    fn public_url(config: &AdapterConfig, key: &str) -> Option<String> {
        let bucket = config.get_str("bucket_name")?;
        match region(config) {
            DEFAULT_REGION => Some(format!("https://{}.s3.amazonaws.com/{}", bucket, key)),
            region => Some(format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::adapter::{AccessMethod, ConfigurableAdapter, StorageAdapter};
    use crate::cloud::S3Adapter;
    use perceptra_common::{AdapterConfig, Credentials, ErrorKind};
    use std::time::Duration;

    fn credentials() -> Credentials {
        Credentials::new()
            .with("access_key_id", "AKIDEXAMPLE")
            .with("secret_access_key", "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY")
    }

    #[test]
    fn test_validate_config() {
        let err = S3Adapter::validate_config(&AdapterConfig::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        assert!(err.message().contains("bucket_name"));

        let err = S3Adapter::validate_config(&AdapterConfig::new().with("bucket_name", " ")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);

        assert!(S3Adapter::validate_config(&AdapterConfig::new().with("bucket_name", "media")).is_ok());
    }

    #[test]
    fn test_public_url_by_region() {
        let adapter =
            S3Adapter::from_config(AdapterConfig::new().with("bucket_name", "media"), credentials())
                .unwrap();
        assert_eq!(
            adapter.public_url("a/b.jpg").as_deref(),
            Some("https://media.s3.amazonaws.com/a/b.jpg")
        );

        let adapter = S3Adapter::from_config(
            AdapterConfig::new()
                .with("bucket_name", "media")
                .with("region", "eu-west-1"),
            credentials(),
        )
        .unwrap();
        assert_eq!(
            adapter.public_url("a/b.jpg").as_deref(),
            Some("https://media.s3.eu-west-1.amazonaws.com/a/b.jpg")
        );
    }

    #[tokio::test]
    async fn test_presigned_url_does_not_verify_existence() {
        let adapter =
            S3Adapter::from_config(AdapterConfig::new().with("bucket_name", "media"), credentials())
                .unwrap();

        let url = adapter
            .presigned_url("missing.txt", Duration::from_secs(3600), AccessMethod::Get)
            .await
            .unwrap();

        assert!(url.url.contains("media"));
        assert!(url.url.contains("missing.txt"));
        assert!(url.url.contains("X-Amz-Signature"));
        assert!(url.url.contains("X-Amz-Expires=3600"));
        assert_eq!(url.method, AccessMethod::Get);
        assert!(!url.is_expired());
    }

    #[test]
    fn test_debug_hides_credentials() {
        let adapter =
            S3Adapter::from_config(AdapterConfig::new().with("bucket_name", "media"), credentials())
                .unwrap();
        let debug = format!("{:?}", adapter);
        assert_eq!(debug, "<s3 config_keys=[\"bucket_name\"]>");
        assert!(!debug.contains("AKIDEXAMPLE"));
    }
}
