//! Storage adapter abstraction for Perceptra.
//!
//! This crate provides a trait-based interface over object storage backends
//! (local filesystem, S3, MinIO, Azure Blob Storage, a generic HTTP server)
//! and a registry for resolving backends by identifier.
//!
//! # Design Principles
//! - Backend isolation: no vendor type crosses the [`StorageAdapter`] boundary
//! - Unified error semantics: every failure is one of five [`ErrorKind`]s
//! - Async operations: all I/O operations are async
//! - Construction validates configuration before any I/O
//!
//! ```no_run
//! use perceptra_storage::{get_storage_adapter, AdapterConfig, Credentials, UploadOptions};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AdapterConfig::new().with("base_path", "/var/lib/perceptra");
//! let adapter = get_storage_adapter("local", config, Credentials::new())?;
//!
//! adapter.upload("frames/0001.jpg", vec![0xff, 0xd8], UploadOptions::new()).await?;
//! let objects = adapter.list("frames/", 100).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod cloud;
pub mod local;
pub mod memory;
pub mod registry;
pub mod remote;

pub use adapter::{
    AccessMethod, ByteStream, ConfigurableAdapter, PresignedUrl, StorageAdapter, StorageObject,
    UploadOptions,
};
pub use cloud::{AzureAdapter, CloudAdapter, MinioAdapter, S3Adapter};
pub use local::LocalAdapter;
pub use memory::MemoryAdapter;
pub use registry::{
    available_backends, get_storage_adapter, register_adapter, AdapterFactory, AdapterRegistry,
    BackendInfo, RegistryError, RegistryResult,
};
pub use remote::RemoteAdapter;

pub use perceptra_common::{AdapterConfig, Credentials, ErrorKind, Result, StorageError};
