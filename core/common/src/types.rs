//! Configuration and credential values handed to storage adapters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use zeroize::Zeroize;

use crate::error::{Result, StorageError};

/// Backend-specific configuration options.
///
/// A flat map of named options (bucket, base directory, endpoint, TLS flag,
/// ...). Adapters validate it once at construction and never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterConfig(Map<String, Value>);

impl AdapterConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Build a configuration from a JSON value.
    ///
    /// # Errors
    /// - The value is not a JSON object
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(StorageError::invalid_config(format!(
                "Configuration must be an object, got {}",
                other
            ))),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string option. Non-string values yield `None`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Get a required string option.
    ///
    /// # Errors
    /// - Option is absent or null
    /// - Option is an empty or whitespace-only string
    /// - Option is not a string
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            None | Some(Value::Null) => Err(StorageError::invalid_config(format!(
                "'{}' is required",
                key
            ))),
            Some(Value::String(s)) if s.trim().is_empty() => Err(
                StorageError::invalid_config(format!("'{}' cannot be empty", key)),
            ),
            Some(Value::String(s)) => Ok(s.as_str()),
            Some(other) => Err(StorageError::invalid_config(format!(
                "'{}' must be a string, got {}",
                key, other
            ))),
        }
    }

    /// Get a boolean option, accepting JSON booleans or the usual strings.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(StorageError::invalid_config(format!(
                    "'{}' must be a boolean, got {:?}",
                    key, s
                ))),
            },
            Some(other) => Err(StorageError::invalid_config(format!(
                "'{}' must be a boolean, got {}",
                key, other
            ))),
        }
    }

    /// Get a non-negative integer option, accepting numbers or numeric strings.
    pub fn get_u64(&self, key: &str, default: u64) -> Result<u64> {
        let invalid = || {
            StorageError::invalid_config(format!("'{}' must be a non-negative integer", key))
        };
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(Value::Number(n)) => n.as_u64().ok_or_else(invalid),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    /// Option names, in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for AdapterConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Secret string wrapper that zeroizes on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SensitiveString(String);

impl SensitiveString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SensitiveString([REDACTED])")
    }
}

/// Authentication material for a backend.
///
/// Held passively by the adapter for its lifetime. Values never appear in
/// `Debug` output or logs.
#[derive(Clone, Default, Deserialize)]
#[serde(from = "HashMap<String, String>")]
pub struct Credentials {
    entries: HashMap<String, SensitiveString>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .insert(key.into(), SensitiveString::new(value.into()));
    }

    /// Get a credential value. Empty values are treated as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .filter(|v| !v.is_empty())
            .map(SensitiveString::expose)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl From<HashMap<String, String>> for Credentials {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Credentials {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut credentials = Self::new();
        for (key, value) in iter {
            credentials.insert(key, value);
        }
        credentials
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials([REDACTED; {} entries])", self.entries.len())
    }
}
