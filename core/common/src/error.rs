//! Error taxonomy shared by every storage backend.
//!
//! Backends translate their native failures into exactly one
//! [`StorageError`] variant at the point of the vendor call, attaching the
//! native error as the source. No backend-specific error type crosses the
//! adapter boundary.

use std::fmt;
use std::io;

use thiserror::Error;

/// Underlying cause attached to a storage error for diagnostics.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Semantic kind of a [`StorageError`], for backend-independent matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Backend unreachable or storage scope inaccessible.
    Connection,
    /// Backend refused the operation.
    PermissionDenied,
    /// The addressed key does not exist.
    NotFound,
    /// Any other backend failure.
    Operation,
    /// Caller-supplied configuration is structurally invalid.
    InvalidConfig,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NotFound => "not found",
            ErrorKind::Operation => "operation",
            ErrorKind::InvalidConfig => "invalid configuration",
        };
        f.write_str(name)
    }
}

/// Top-level error type for storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection to the backend failed, or the configured bucket,
    /// container or base directory could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-reported authorization failure.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Resource not found.
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Storage operation failed.
    #[error("Operation failed: {message}")]
    Operation {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration is missing a required option or holds an invalid value.
    ///
    /// Only ever raised while constructing an adapter, before any I/O.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
            source: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            source: None,
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Attach the native failure that caused this error.
    ///
    /// Configuration errors are resolved locally and carry no cause, so the
    /// source is discarded for [`StorageError::InvalidConfig`].
    pub fn with_source<E>(self, err: E) -> Self
    where
        E: Into<BoxError>,
    {
        let cause = Some(err.into());
        match self {
            Self::Connection { message, .. } => Self::Connection {
                message,
                source: cause,
            },
            Self::PermissionDenied { message, .. } => Self::PermissionDenied {
                message,
                source: cause,
            },
            Self::NotFound { message, .. } => Self::NotFound {
                message,
                source: cause,
            },
            Self::Operation { message, .. } => Self::Operation {
                message,
                source: cause,
            },
            invalid @ Self::InvalidConfig(_) => invalid,
        }
    }

    /// Semantic kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection { .. } => ErrorKind::Connection,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Operation { .. } => ErrorKind::Operation,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }

    /// Human readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection { message, .. }
            | Self::PermissionDenied { message, .. }
            | Self::NotFound { message, .. }
            | Self::Operation { message, .. } => message,
            Self::InvalidConfig(message) => message,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        let message = err.to_string();
        let mapped = match err.kind() {
            io::ErrorKind::NotFound => Self::not_found(message),
            io::ErrorKind::PermissionDenied => Self::permission_denied(message),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut => Self::connection(message),
            _ => Self::operation(message),
        };
        mapped.with_source(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::operation(format!("Serialization error: {}", err)).with_source(err)
    }
}

/// Result type alias using [`StorageError`].
pub type Result<T> = std::result::Result<T, StorageError>;
