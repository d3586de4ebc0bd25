//! Device-local persistent storage.
//!
//! The engine persists key material and session snapshots as JSON strings
//! under `(namespace, key)` pairs. The trait is async so real backends
//! (files, sqlite, platform keystores) can do I/O; tests and the engine's
//! defaults use the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::SessionError;

/// Namespace for the identity key secret.
pub(crate) const NS_IDENTITY: &str = "identity";
/// Namespace for the signed prekey pair.
pub(crate) const NS_SIGNED_PREKEY: &str = "signed_prekey";
/// Namespace for one-time prekey secrets, keyed by `{user}:{id}`.
pub(crate) const NS_PREKEYS: &str = "prekeys";
/// Namespace for session snapshots, keyed by `{local}:{peer}:{conversation}`.
pub(crate) const NS_SESSIONS: &str = "sessions";

/// Device-local key/value storage.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Store `value` under `(namespace, key)`, replacing any previous value.
    async fn put(&self, namespace: &str, key: &str, value: String) -> Result<(), SessionError>;

    /// Fetch the value under `(namespace, key)`, if present.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, SessionError>;

    /// Remove the value under `(namespace, key)`. Removing a missing key is
    /// not an error.
    async fn remove(&self, namespace: &str, key: &str) -> Result<(), SessionError>;
}

/// In-memory [`LocalStore`] backed by a mutex-guarded map.
#[derive(Clone, Default)]
pub struct MemoryLocalStore {
    inner: Arc<Mutex<HashMap<(String, String), String>>>,
}

impl MemoryLocalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<(String, String), String>>, SessionError> {
        self.inner
            .lock()
            .map_err(|_| SessionError::Storage { reason: "local store lock poisoned".to_string() })
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn put(&self, namespace: &str, key: &str, value: String) -> Result<(), SessionError> {
        self.lock()?.insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.lock()?.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    async fn remove(&self, namespace: &str, key: &str) -> Result<(), SessionError> {
        self.lock()?.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}
