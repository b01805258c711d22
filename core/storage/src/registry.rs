//! Adapter registry for resolving backends by identifier.
//!
//! Identifiers are matched case-insensitively after trimming whitespace.
//! A process-wide registry pre-populated with the built-in backends is
//! available through [`global`] and the free functions below it.

use std::any::type_name;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use thiserror::Error;
use tracing::debug;

use crate::adapter::{ConfigurableAdapter, StorageAdapter};
use perceptra_common::{AdapterConfig, Credentials, ErrorKind, StorageError};

/// Constructor stored in the registry.
pub type AdapterFactory =
    Arc<dyn Fn(AdapterConfig, Credentials) -> perceptra_common::Result<Arc<dyn StorageAdapter>> + Send + Sync>;

/// Errors raised by registry lookup and resolution.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown storage backend: '{backend}'. Available backends: {}", .available.join(", "))]
    UnknownBackend {
        backend: String,
        available: Vec<String>,
    },

    #[error("Invalid backend identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Construction failed; the adapter's own error is kept as the source.
    #[error("Failed to initialize {backend} adapter: {source}")]
    Initialization {
        backend: String,
        #[source]
        source: StorageError,
    },
}

impl RegistryError {
    /// Taxonomy kind of the failure.
    ///
    /// Lookup failures are configuration errors; initialization failures
    /// report the kind of the underlying cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegistryError::UnknownBackend { .. } | RegistryError::InvalidIdentifier(_) => {
                ErrorKind::InvalidConfig
            }
            RegistryError::Initialization { source, .. } => source.kind(),
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Description of a registered backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub id: String,
    /// Rust type name, when registered from a type.
    pub type_name: Option<&'static str>,
    /// Options that must be present, when registered from a type.
    pub required_options: Option<&'static [&'static str]>,
}

struct Registration {
    factory: AdapterFactory,
    type_name: Option<&'static str>,
    required_options: Option<&'static [&'static str]>,
}

/// Thread-safe registry of adapter constructors.
///
/// Lookups take a shared lock; registration takes an exclusive one. The
/// lock is released before a constructor runs.
pub struct AdapterRegistry {
    factories: RwLock<HashMap<String, Registration>>,
}

fn normalize(id: &str) -> String {
    id.trim().to_lowercase()
}

impl AdapterRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry holding every built-in backend.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.insert_type::<crate::local::LocalAdapter>(crate::local::LocalAdapter::BACKEND);
        registry.insert_type::<crate::memory::MemoryAdapter>(crate::memory::MemoryAdapter::BACKEND);
        registry.insert_type::<crate::cloud::S3Adapter>(crate::cloud::S3Adapter::BACKEND);
        registry.insert_type::<crate::cloud::MinioAdapter>(crate::cloud::MinioAdapter::BACKEND);
        registry.insert_type::<crate::cloud::AzureAdapter>(crate::cloud::AzureAdapter::BACKEND);
        registry.insert_type::<crate::remote::RemoteAdapter>(crate::remote::RemoteAdapter::BACKEND);
        registry
    }

    /// Register a constructor, replacing any existing entry.
    ///
    /// The constructor must produce a [`StorageAdapter`]; anything else is
    /// rejected by the type system.
    ///
    /// # Errors
    /// - `InvalidIdentifier` if `id` is empty after trimming
    pub fn register<F>(&self, id: &str, factory: F) -> RegistryResult<()>
    where
        F: Fn(AdapterConfig, Credentials) -> perceptra_common::Result<Arc<dyn StorageAdapter>>
            + Send
            + Sync
            + 'static,
    {
        let key = normalize(id);
        if key.is_empty() {
            return Err(RegistryError::InvalidIdentifier(id.to_string()));
        }

        self.store(
            key,
            Registration {
                factory: Arc::new(factory),
                type_name: None,
                required_options: None,
            },
        );
        Ok(())
    }

    /// Register an adapter type under its own identifier.
    pub fn register_adapter<A: ConfigurableAdapter>(&self) -> RegistryResult<()> {
        self.register_as::<A>(A::BACKEND)
    }

    /// Register an adapter type under a custom identifier.
    ///
    /// # Errors
    /// - `InvalidIdentifier` if `id` is empty after trimming
    pub fn register_as<A: ConfigurableAdapter>(&self, id: &str) -> RegistryResult<()> {
        if normalize(id).is_empty() {
            return Err(RegistryError::InvalidIdentifier(id.to_string()));
        }
        self.insert_type::<A>(id);
        Ok(())
    }

    fn insert_type<A: ConfigurableAdapter>(&self, id: &str) {
        let factory: AdapterFactory = Arc::new(
            |config: AdapterConfig,
             credentials: Credentials|
             -> perceptra_common::Result<Arc<dyn StorageAdapter>> {
                let adapter = A::from_config(config, credentials)?;
                Ok(Arc::new(adapter))
            },
        );

        self.store(
            normalize(id),
            Registration {
                factory,
                type_name: Some(type_name::<A>()),
                required_options: Some(A::REQUIRED_OPTIONS),
            },
        );
    }

    fn store(&self, key: String, registration: Registration) {
        debug!("Registering storage backend: {}", key);
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, registration);
    }

    /// Resolve a backend by identifier and build an adapter.
    ///
    /// # Errors
    /// - `UnknownBackend` if no constructor is registered for `id`
    /// - `Initialization` wrapping any construction failure, including
    ///   configuration validation
    pub fn resolve(
        &self,
        id: &str,
        config: AdapterConfig,
        credentials: Credentials,
    ) -> RegistryResult<Arc<dyn StorageAdapter>> {
        let key = normalize(id);

        let factory = {
            let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
            match factories.get(&key) {
                Some(registration) => Arc::clone(&registration.factory),
                None => {
                    let mut available: Vec<String> = factories.keys().cloned().collect();
                    available.sort();
                    return Err(RegistryError::UnknownBackend {
                        backend: id.to_string(),
                        available,
                    });
                }
            }
        };

        factory(config, credentials).map_err(|source| RegistryError::Initialization {
            backend: key,
            source,
        })
    }

    /// Sorted list of registered identifiers.
    pub fn backends(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Check if a backend is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&normalize(id))
    }

    /// Describe a registered backend.
    pub fn backend_info(&self, id: &str) -> Option<BackendInfo> {
        let key = normalize(id);
        let factories = self.factories.read().unwrap_or_else(PoisonError::into_inner);
        factories.get(&key).map(|registration| BackendInfo {
            id: key.clone(),
            type_name: registration.type_name,
            required_options: registration.required_options,
        })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry, initialized with the built-in backends.
pub fn global() -> &'static AdapterRegistry {
    static REGISTRY: OnceLock<AdapterRegistry> = OnceLock::new();
    REGISTRY.get_or_init(AdapterRegistry::with_builtin)
}

/// Build an adapter from the process-wide registry.
pub fn get_storage_adapter(
    backend: &str,
    config: AdapterConfig,
    credentials: Credentials,
) -> RegistryResult<Arc<dyn StorageAdapter>> {
    global().resolve(backend, config, credentials)
}

/// Register an adapter type with the process-wide registry.
pub fn register_adapter<A: ConfigurableAdapter>(id: &str) -> RegistryResult<()> {
    global().register_as::<A>(id)
}

/// Identifiers known to the process-wide registry.
pub fn available_backends() -> Vec<String> {
    global().backends()
}
