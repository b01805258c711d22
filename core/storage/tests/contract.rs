//! Behavior every in-process backend must share.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use perceptra_storage::{
    AccessMethod, AdapterConfig, AdapterRegistry, ConfigurableAdapter, Credentials, ErrorKind,
    LocalAdapter, MemoryAdapter, MinioAdapter, RemoteAdapter, S3Adapter, AzureAdapter,
    StorageAdapter, UploadOptions,
};
use tempfile::TempDir;

/// Build one adapter per in-process backend. The TempDir must outlive the
/// local adapter.
fn backends() -> (TempDir, Vec<Arc<dyn StorageAdapter>>) {
    let temp = TempDir::new().unwrap();
    let registry = AdapterRegistry::with_builtin();

    let local = registry
        .resolve(
            "local",
            AdapterConfig::new().with("base_path", temp.path().to_string_lossy().into_owned()),
            Credentials::new(),
        )
        .unwrap();
    let memory = registry
        .resolve("memory", AdapterConfig::new(), Credentials::new())
        .unwrap();

    (temp, vec![local, memory])
}

#[tokio::test]
async fn round_trip_preserves_bytes() {
    let (_temp, adapters) = backends();
    let payloads: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"hi".to_vec(),
        (0..=255u8).collect(),
        vec![0u8; 1 << 16],
    ];

    for adapter in &adapters {
        for (i, payload) in payloads.iter().enumerate() {
            let key = format!("round/{}.bin", i);
            adapter
                .upload(&key, payload.clone(), UploadOptions::new())
                .await
                .unwrap();
            assert_eq!(
                &adapter.download(&key, None).await.unwrap(),
                payload,
                "{:?}",
                adapter
            );
        }
    }
}

#[tokio::test]
async fn exists_is_false_before_upload_and_after_delete() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        assert!(!adapter.exists("k.txt").await.unwrap());
        adapter
            .upload("k.txt", b"v".to_vec(), UploadOptions::new())
            .await
            .unwrap();
        assert!(adapter.exists("k.txt").await.unwrap());
        adapter.delete("k.txt").await.unwrap();
        assert!(!adapter.exists("k.txt").await.unwrap());
    }
}

#[tokio::test]
async fn delete_without_upload_is_not_found() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        let err = adapter.delete("never-written.txt").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{:?}", adapter);
    }
}

#[tokio::test]
async fn missing_keys_are_not_found() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        assert_eq!(
            adapter.download("missing.txt", None).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            adapter.metadata("missing.txt").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}

#[tokio::test]
async fn empty_backend_lists_nothing() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        assert!(adapter.list("", 1000).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn list_returns_exactly_the_prefixed_keys() {
    let (_temp, adapters) = backends();
    let keys = ["a/b.txt", "a/c/d.txt", "ab.txt", "b/a.txt", "z.txt"];

    for adapter in &adapters {
        for key in keys {
            adapter
                .upload(key, key.as_bytes().to_vec(), UploadOptions::new())
                .await
                .unwrap();
        }

        for prefix in ["", "a", "a/", "a/c/", "b", "z.txt", "nothing", "a/b.txt/"] {
            let listed: BTreeSet<String> = adapter
                .list(prefix, 1000)
                .await
                .unwrap()
                .into_iter()
                .map(|o| o.key)
                .collect();
            let expected: BTreeSet<String> = keys
                .iter()
                .filter(|k| k.starts_with(prefix))
                .map(|k| k.to_string())
                .collect();
            assert_eq!(listed, expected, "prefix {:?} on {:?}", prefix, adapter);
        }

        assert_eq!(adapter.list("", 2).await.unwrap().len(), 2);
    }
}

#[tokio::test]
async fn upload_then_list_reports_size() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        adapter
            .upload("a/b.txt", b"hi".to_vec(), UploadOptions::new())
            .await
            .unwrap();

        let listed = adapter.list("a/", 100).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "a/b.txt");
        assert_eq!(listed[0].size, 2);
    }
}

#[tokio::test]
async fn upload_overwrites() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        adapter
            .upload("k", b"first".to_vec(), UploadOptions::new())
            .await
            .unwrap();
        adapter
            .upload("k", b"second!".to_vec(), UploadOptions::new())
            .await
            .unwrap();

        assert_eq!(adapter.download("k", None).await.unwrap(), b"second!");
        assert_eq!(adapter.metadata("k").await.unwrap().size, 7);
    }
}

#[tokio::test]
async fn presign_missing_key_is_not_found_on_verifying_backends() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        for method in [AccessMethod::Get, AccessMethod::Put, AccessMethod::Delete] {
            let err = adapter
                .presigned_url("missing.txt", Duration::from_secs(3600), method)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NotFound, "{:?} {:?}", adapter, method);
        }
    }
}

#[tokio::test]
async fn unsupported_method_is_operation_error() {
    let err = "PATCH".parse::<AccessMethod>().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert_eq!(" get ".parse::<AccessMethod>().unwrap(), AccessMethod::Get);
}

#[tokio::test]
async fn connection_test_succeeds_and_leaves_no_trace() {
    let (_temp, adapters) = backends();

    for adapter in &adapters {
        assert!(adapter.test_connection(Duration::from_secs(5)).await.unwrap());
        assert!(adapter.list("", 1000).await.unwrap().is_empty());
    }
}

#[test]
fn missing_required_options_fail_before_io() {
    fn check<A: ConfigurableAdapter>(complete: AdapterConfig) {
        assert!(A::validate_config(&complete).is_ok(), "{}", A::BACKEND);

        for required in A::REQUIRED_OPTIONS {
            let partial: AdapterConfig = complete
                .keys()
                .into_iter()
                .filter(|k| k != required)
                .map(|k| (k.to_string(), complete.get(k).cloned().unwrap()))
                .collect();
            let err = A::validate_config(&partial).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig, "{} without {}", A::BACKEND, required);

            let blank = partial.clone().with(*required, "");
            let err = A::validate_config(&blank).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        }
    }

    check::<LocalAdapter>(AdapterConfig::new().with("base_path", "/nonexistent/should/not/be/created"));
    check::<MemoryAdapter>(AdapterConfig::new());
    check::<S3Adapter>(AdapterConfig::new().with("bucket_name", "media"));
    check::<MinioAdapter>(
        AdapterConfig::new()
            .with("bucket_name", "media")
            .with("endpoint_url", "localhost:9000"),
    );
    check::<AzureAdapter>(
        AdapterConfig::new()
            .with("container_name", "frames")
            .with("account_name", "perceptra"),
    );
    check::<RemoteAdapter>(AdapterConfig::new().with("base_url", "https://storage.example.com"));

    assert!(!std::path::Path::new("/nonexistent/should/not/be/created").exists());
}

#[test]
fn factory_rejects_unknown_and_invalid() {
    let registry = AdapterRegistry::with_builtin();

    let err = registry
        .resolve("  FTP ", AdapterConfig::new(), Credentials::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);

    let err = registry
        .resolve(" S3 ", AdapterConfig::new(), Credentials::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
}

#[test]
fn debug_output_never_contains_credentials() {
    let registry = AdapterRegistry::with_builtin();
    let adapter = registry
        .resolve(
            "remote",
            AdapterConfig::new().with("base_url", "https://storage.example.com"),
            Credentials::new().with("api_key", "super-secret-key"),
        )
        .unwrap();

    let debug = format!("{:?}", adapter);
    assert!(debug.contains("remote"));
    assert!(!debug.contains("super-secret-key"));
}
