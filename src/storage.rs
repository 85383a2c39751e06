//! Key-value settings store
//!
//! Persists inline bot state as namespaced JSON values, the same shape the
//! userbot keeps its module configuration in.

use crate::config::{CUSTOM_BOT_KEY, STORE_NAMESPACE, TOKEN_KEY};
use crate::manager::Token;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Interface for key-value stores
pub trait SettingsStore: Send + Sync {
    /// Reads a value, `None` when the key was never written
    fn get(&self, namespace: &str, key: &str) -> Option<Value>;
    /// Writes a value
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the value cannot be persisted.
    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError>;
}

type Namespaces = HashMap<String, Map<String, Value>>;

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<Namespaces>,
}

impl MemoryStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(namespace)?.get(key).cloned()
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Store backed by a single JSON document on disk
///
/// Every write rewrites the whole document through a temporary file and a
/// rename, so a crash never leaves a half-written store behind.
///
/// Writes are synchronous `std::fs` calls made from async callers. The
/// document holds a handful of keys, so a write blocks the worker thread
/// only for a single small file replace.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: RwLock<Namespaces>,
}

impl JsonFileStore {
    /// Opens the store, starting empty if the file does not exist yet
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => Namespaces::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Store {} does not exist yet, starting empty", path.display());
                Namespaces::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Location of the backing document
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, data: &Namespaces) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(namespace)?.get(key).cloned()
    }

    fn set(&self, namespace: &str, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let previous = data
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);

        if let Err(e) = self.flush(&data) {
            warn!("Failed to persist {namespace}.{key}: {e}");
            // Keep memory and disk in step
            let section = data.entry(namespace.to_string()).or_default();
            match previous {
                Some(old) => section.insert(key.to_string(), old),
                None => section.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// Custom companion bot username, without the leading `@`
///
/// The preference is stored as a string or `false`; empty strings count as unset.
#[must_use]
pub fn custom_bot(store: &dyn SettingsStore) -> Option<String> {
    store
        .get(STORE_NAMESPACE, CUSTOM_BOT_KEY)
        .and_then(|value| value.as_str().map(str::to_owned))
        .map(|name| name.trim().trim_start_matches('@').to_string())
        .filter(|name| !name.is_empty())
}

/// Sets or clears the custom companion bot username
///
/// # Errors
///
/// Returns `StoreError` if the store write fails.
pub fn set_custom_bot(store: &dyn SettingsStore, username: Option<&str>) -> Result<(), StoreError> {
    let value = username.map_or(Value::Bool(false), |name| {
        Value::String(name.trim_start_matches('@').to_string())
    });
    store.set(STORE_NAMESPACE, CUSTOM_BOT_KEY, value)
}

/// Token persisted by a previous run, malformed values are ignored
#[must_use]
pub fn stored_token(store: &dyn SettingsStore) -> Option<Token> {
    let raw = store.get(STORE_NAMESPACE, TOKEN_KEY)?;
    let raw = raw.as_str()?;
    match Token::parse(raw) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("Ignoring stored bot token: {e}");
            None
        }
    }
}

/// Persists the token, `None` is written as null
///
/// # Errors
///
/// Returns `StoreError` if the store write fails.
pub fn save_token(store: &dyn SettingsStore, token: Option<&Token>) -> Result<(), StoreError> {
    let value = token.map_or(Value::Null, |t| Value::String(t.as_str().to_string()));
    store.set(STORE_NAMESPACE, TOKEN_KEY, value)
}
