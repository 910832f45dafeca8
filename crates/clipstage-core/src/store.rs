//! Durable scope store port
//!
//! A plain string key/value store. Keys are namespaced per scope:
//! `staging:{scope}` for the queue and `snapshot:{scope}` for the
//! last confirmed record collection.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;

/// Errors from a scope store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on key {key}: {message}")]
    Io { key: String, message: String },

    #[error("Corrupt value under key {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// The trait that all scope storage backends implement.
pub trait ScopeStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

pub fn staging_key(scope_id: &str) -> String {
    format!("staging:{scope_id}")
}

pub fn snapshot_key(scope_id: &str) -> String {
    format!("snapshot:{scope_id}")
}

/// Read and decode a JSON value. Unreadable or unparseable values are
/// reported and treated as absent.
pub(crate) fn load_json<T: DeserializeOwned>(store: &dyn ScopeStore, key: &str) -> Option<T> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to read from scope store");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding corrupt persisted value");
            None
        }
    }
}

pub(crate) fn save_json<T: Serialize + ?Sized>(
    store: &dyn ScopeStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let json = serde_json::to_string(value).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    store.set(key, &json)
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Process-local store, for tests and embedders that do not need durability
#[derive(Debug, Default)]
pub struct MemoryScopeStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryScopeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ScopeStore for MemoryScopeStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}
