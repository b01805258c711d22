//! Common utilities and types shared across the Perceptra storage crates.
//!
//! This module provides the backend-independent error taxonomy and the
//! passive configuration and credential values every adapter is built from.

pub mod error;
pub mod types;

pub use error::{BoxError, ErrorKind, Result, StorageError};
pub use types::{AdapterConfig, Credentials, SensitiveString};
