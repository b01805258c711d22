use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::client::{map_status, map_transport, RemoteClient, RetryConfig};
use crate::adapter::{
    describe, write_destination, AccessMethod, ConfigurableAdapter, PresignedUrl, StorageAdapter,
    StorageObject, UploadOptions,
};
use perceptra_common::{AdapterConfig, Credentials, Result, StorageError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRIES: u64 = 3;

/// Object description as returned by the server.
#[derive(Debug, Deserialize)]
struct RemoteObject {
    #[serde(default)]
    key: Option<String>,
    size: u64,
    last_modified: String,
    #[serde(default)]
    etag: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    files: Vec<RemoteObject>,
}

#[derive(Debug, Deserialize)]
struct PresignedResponse {
    url: String,
    expires_at: String,
}

/// Parse an ISO-8601 timestamp; values without an offset are taken as UTC.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            StorageError::operation(format!("Invalid timestamp from remote server: {}", value))
                .with_source(e)
        })
}

impl RemoteObject {
    fn into_object(self, fallback_key: &str) -> Result<StorageObject> {
        let last_modified = parse_timestamp(&self.last_modified)?;
        let key = self.key.unwrap_or_else(|| fallback_key.to_string());

        let mut object = StorageObject::new(key, self.size, last_modified)
            .with_content_type(self.content_type)
            .with_metadata(self.metadata.unwrap_or_default());
        if let Some(etag) = self.etag {
            object = object.with_etag(etag);
        }
        Ok(object)
    }
}

/// Remote HTTP storage adapter.
///
/// Configuration:
/// - `base_url` (required)
/// - `timeout` seconds (default 30)
/// - `verify_ssl` (default `true`)
/// - `max_retries` (default 3)
///
/// Credentials: `api_key`, or `token`, or `username` and `password`.
pub struct RemoteAdapter {
    config: AdapterConfig,
    client: RemoteClient,
}

impl RemoteAdapter {
    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.client.set_retry(retry);
        self
    }
}

impl fmt::Debug for RemoteAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        describe(f, Self::BACKEND, &self.config)
    }
}

impl ConfigurableAdapter for RemoteAdapter {
    const BACKEND: &'static str = "remote";
    const REQUIRED_OPTIONS: &'static [&'static str] = &["base_url"];

    fn validate_config(config: &AdapterConfig) -> Result<()> {
        let base_url = config.require_str("base_url").map_err(|_| {
            StorageError::invalid_config("remote adapter requires non-empty 'base_url' in config")
        })?;
        url::Url::parse(base_url).map_err(|e| {
            StorageError::invalid_config(format!("Invalid base_url {:?}: {}", base_url, e))
        })?;

        config.get_u64("timeout", DEFAULT_TIMEOUT_SECS)?;
        config.get_u64("max_retries", DEFAULT_MAX_RETRIES)?;
        config.get_bool("verify_ssl", true)?;
        Ok(())
    }

    fn from_config(config: AdapterConfig, credentials: Credentials) -> Result<Self> {
        Self::validate_config(&config)?;

        let timeout = Duration::from_secs(config.get_u64("timeout", DEFAULT_TIMEOUT_SECS)?);
        let verify_ssl = config.get_bool("verify_ssl", true)?;
        let max_retries = config.get_u64("max_retries", DEFAULT_MAX_RETRIES)?;
        let retry = RetryConfig::new(u32::try_from(max_retries).unwrap_or(u32::MAX));

        let client = RemoteClient::new(
            config.require_str("base_url")?,
            timeout,
            verify_ssl,
            retry,
            &credentials,
        )?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl StorageAdapter for RemoteAdapter {
    fn name(&self) -> &str {
        Self::BACKEND
    }

    fn config(&self) -> &AdapterConfig {
        &self.config
    }

    async fn test_connection(&self, timeout: Duration) -> Result<bool> {
        let url = self.client.url("/health");

        let response = self
            .client
            .send("health check", |http| http.get(&url).timeout(timeout))
            .await
            .map_err(|e| {
                StorageError::connection(format!(
                    "Cannot connect to remote server: {}",
                    self.client.base_url()
                ))
                .with_source(e)
            })?;

        match response.status() {
            StatusCode::OK => {
                info!("Successfully connected to remote storage: {}", self.client.base_url());
                Ok(true)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StorageError::permission_denied(
                "Remote server rejected the health check credentials",
            )),
            status => Err(StorageError::connection(format!(
                "Remote server health check failed with status {}",
                status.as_u16()
            ))),
        }
    }

    async fn upload(&self, key: &str, data: Vec<u8>, options: UploadOptions) -> Result<String> {
        let url = self.client.file_url(key, None);
        let content_type = options
            .content_type
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let metadata = match options.metadata {
            Some(metadata) if !metadata.is_empty() => Some(serde_json::to_string(&metadata)?),
            _ => None,
        };

        // Validate once; the form is rebuilt for every attempt.
        Part::bytes(Vec::new())
            .mime_str(&content_type)
            .map_err(|e| {
                StorageError::operation(format!("Invalid content type {:?}", content_type))
                    .with_source(e)
            })?;

        let response = self
            .client
            .send("upload", |http| {
                let part = Part::bytes(data.clone())
                    .file_name(key.to_string())
                    .mime_str(&content_type)
                    .unwrap_or_else(|_| Part::bytes(data.clone()).file_name(key.to_string()));
                let mut form = Form::new().part("file", part);
                if let Some(metadata) = &metadata {
                    form = form.text("metadata", metadata.clone());
                }
                http.put(&url).multipart(form)
            })
            .await?;
        RemoteClient::check(response, "upload").await?;

        info!("Uploaded file to remote server: {}", key);
        Ok(key.to_string())
    }

    async fn download(&self, key: &str, destination: Option<&Path>) -> Result<Vec<u8>> {
        let url = self.client.file_url(key, None);

        let response = self.client.send("download", |http| http.get(&url)).await?;
        let response = RemoteClient::check(response, "download").await?;
        let data = response
            .bytes()
            .await
            .map_err(|e| map_transport(e, "download"))?
            .to_vec();

        if let Some(destination) = destination {
            write_destination(destination, &data).await?;
            info!("Downloaded remote file to: {}", destination.display());
        } else {
            info!("Downloaded remote file: {}", key);
        }

        Ok(data)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.client.file_url(key, None);

        let response = self.client.send("delete", |http| http.delete(&url)).await?;
        RemoteClient::check(response, "delete").await?;

        info!("Deleted remote file: {}", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let url = self.client.file_url(key, None);

        let response = self.client.send("exists check", |http| http.head(&url)).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(map_status(status, "exists check", "")),
        }
    }

    async fn metadata(&self, key: &str) -> Result<StorageObject> {
        let url = self.client.file_url(key, Some("metadata"));

        let remote: RemoteObject = self
            .client
            .json("metadata retrieval", |http| http.get(&url))
            .await?;
        remote.into_object(key)
    }

    async fn list(&self, prefix: &str, max_results: usize) -> Result<Vec<StorageObject>> {
        let url = self.client.url("/files");
        let limit = max_results.to_string();

        let listing: ListResponse = self
            .client
            .json("list", |http| {
                let request = http.get(&url).query(&[("max_results", limit.as_str())]);
                if prefix.is_empty() {
                    request
                } else {
                    request.query(&[("prefix", prefix)])
                }
            })
            .await?;

        // The server's filtering is not trusted.
        let mut objects = Vec::new();
        for remote in listing.files {
            let object = remote.into_object("")?;
            if object.key.starts_with(prefix) && !object.key.is_empty() {
                objects.push(object);
            }
            if objects.len() >= max_results {
                break;
            }
        }
        objects.truncate(max_results);

        debug!(
            "Listed {} files from remote server with prefix: {}",
            objects.len(),
            prefix
        );
        Ok(objects)
    }

    /// Existence is checked by the server; a missing key yields `NotFound`.
    async fn presigned_url(
        &self,
        key: &str,
        expires_in: Duration,
        method: AccessMethod,
    ) -> Result<PresignedUrl> {
        let url = self.client.file_url(key, Some("presigned"));
        let body = serde_json::json!({
            "expiration": expires_in.as_secs(),
            "method": method.as_str(),
        });

        let presigned: PresignedResponse = self
            .client
            .json("presigned URL generation", |http| http.post(&url).json(&body))
            .await?;

        Ok(PresignedUrl {
            url: presigned.url,
            expires_at: parse_timestamp(&presigned.expires_at)?,
            method,
        })
    }

    fn public_url(&self, key: &str) -> Option<String> {
        Some(format!("{}/public/{}", self.client.base_url(), key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perceptra_common::ErrorKind;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter_for(server: &MockServer, credentials: Credentials) -> RemoteAdapter {
        let config = AdapterConfig::new()
            .with("base_url", format!("{}/", server.uri()))
            .with("max_retries", 2);
        RemoteAdapter::from_config(config, credentials)
            .unwrap()
            .with_retry(RetryConfig::new(2).with_initial_delay(Duration::from_millis(10)))
    }

    #[test]
    fn test_validate_config() {
        for config in [
            AdapterConfig::new(),
            AdapterConfig::new().with("base_url", ""),
            AdapterConfig::new().with("base_url", "not a url"),
            AdapterConfig::new()
                .with("base_url", "https://storage.example.com")
                .with("timeout", "soon"),
        ] {
            let err = RemoteAdapter::validate_config(&config).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        }

        let config = AdapterConfig::new()
            .with("base_url", "https://storage.example.com")
            .with("timeout", "10")
            .with("verify_ssl", false);
        assert!(RemoteAdapter::validate_config(&config).is_ok());
    }

    #[test]
    fn test_parse_timestamp() {
        let with_offset = parse_timestamp("2024-05-01T10:00:00+02:00").unwrap();
        let naive = parse_timestamp("2024-05-01T08:00:00").unwrap();
        assert_eq!(with_offset, naive);
        assert!(parse_timestamp("2024-05-01T08:00:00.123456").is_ok());
        assert_eq!(parse_timestamp("yesterday").unwrap_err().kind(), ErrorKind::Operation);
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header("X-API-Key", "secret"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new().with("api_key", "secret"));
        assert!(adapter.test_connection(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check_failure_is_connection_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());
        let err = adapter
            .test_connection(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let config = AdapterConfig::new().with("base_url", uri);
        let adapter = RemoteAdapter::from_config(config, Credentials::new())
            .unwrap()
            .with_retry(RetryConfig::new(0));

        let err = adapter.download("a.txt", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/files/a/b.txt"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/a/b.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hi".to_vec()))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new().with("token", "tok"));
        let key = adapter
            .upload(
                "a/b.txt",
                b"hi".to_vec(),
                UploadOptions::new().content_type("text/plain").metadata("k", "v"),
            )
            .await
            .unwrap();
        assert_eq!(key, "a/b.txt");

        let temp = tempfile::TempDir::new().unwrap();
        let destination = temp.path().join("b.txt");
        let data = adapter.download("a/b.txt", Some(&destination)).await.unwrap();
        assert_eq!(data, b"hi");
        assert_eq!(std::fs::read(destination).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/missing.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/locked.txt"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/files/bad.txt"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad key"))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());

        let err = adapter.download("missing.txt", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = adapter.delete("locked.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = adapter.delete("bad.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operation);
        assert!(err.message().contains("bad key"));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/flaky.txt"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/flaky.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());
        assert_eq!(adapter.download("flaky.txt", None).await.unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_status_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/down.txt"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());
        let err = adapter.download("down.txt", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Operation);
    }

    #[tokio::test]
    async fn test_exists() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/files/present.txt"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());
        assert!(adapter.exists("present.txt").await.unwrap());
        assert!(!adapter.exists("absent.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/a.json/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "size": 12,
                "last_modified": "2024-05-01T08:00:00",
                "etag": "abc",
                "content_type": "application/json",
                "metadata": {"owner": "qa"}
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());
        let object = adapter.metadata("a.json").await.unwrap();

        assert_eq!(object.key, "a.json");
        assert_eq!(object.size, 12);
        assert_eq!(object.etag.as_deref(), Some("abc"));
        assert_eq!(object.content_type.as_deref(), Some("application/json"));
        assert_eq!(
            object.metadata.unwrap().get("owner").map(String::as_str),
            Some("qa")
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files"))
            .and(query_param("prefix", "a/"))
            .and(query_param("max_results", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "files": [
                    {"key": "a/1.txt", "size": 1, "last_modified": "2024-05-01T08:00:00Z"},
                    {"key": "b/2.txt", "size": 2, "last_modified": "2024-05-01T08:00:00Z"},
                    {"key": "a/3.txt", "size": 3, "last_modified": "2024-05-01T08:00:00Z"},
                    {"key": "a/4.txt", "size": 4, "last_modified": "2024-05-01T08:00:00Z"}
                ]
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());
        let keys: Vec<String> = adapter
            .list("a/", 2)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.key)
            .collect();
        assert_eq!(keys, vec!["a/1.txt", "a/3.txt"]);
    }

    #[tokio::test]
    async fn test_presigned_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/files/a.txt/presigned"))
            .and(body_json(serde_json::json!({"expiration": 600, "method": "PUT"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://storage.example.com/signed/a.txt?sig=1",
                "expires_at": "2030-01-01T00:00:00+00:00"
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server, Credentials::new());

        let url = adapter
            .presigned_url("a.txt", Duration::from_secs(600), AccessMethod::Put)
            .await
            .unwrap();
        assert_eq!(url.url, "https://storage.example.com/signed/a.txt?sig=1");
        assert_eq!(url.method, AccessMethod::Put);
        assert!(!url.is_expired());

        let err = adapter
            .presigned_url("missing.txt", Duration::from_secs(3600), AccessMethod::Get)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_public_url() {
        let config = AdapterConfig::new().with("base_url", "https://storage.example.com/");
        let adapter = RemoteAdapter::from_config(config, Credentials::new()).unwrap();
        assert_eq!(
            adapter.public_url("a/b.txt").as_deref(),
            Some("https://storage.example.com/public/a/b.txt")
        );
    }
}
