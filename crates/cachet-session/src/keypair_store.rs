//! Local key lifecycle: identity, signed prekey, one-time prekey pool.
//!
//! Secrets live only in the device-local store; the directory receives
//! public halves exclusively. Initialization is idempotent so the engine
//! can call it on every startup.

use std::sync::Arc;

use cachet_crypto::{IdentityKeyPair, OneTimePreKeyPair, SignedPreKeyPair};
use cachet_directory::{KeyDirectory, UserKeyBundleRecord, UserPreKeyRecord};
use tracing::debug;

use crate::error::SessionError;
use crate::local_store::{LocalStore, NS_IDENTITY, NS_PREKEYS, NS_SIGNED_PREKEY};

/// Initial signed prekey id for a fresh device.
const FIRST_SIGNED_PREKEY_ID: u32 = 1;

/// The device's long-lived key material.
pub struct LocalKeys {
    /// Long-term identity key pair.
    pub identity: IdentityKeyPair,
    /// Current signed prekey pair.
    pub signed_prekey: SignedPreKeyPair,
}

impl LocalKeys {
    /// Public bundle record for publishing to the directory.
    fn bundle_record(&self, user_id: &str) -> UserKeyBundleRecord {
        UserKeyBundleRecord {
            user_id: user_id.to_string(),
            identity_key: self.identity.public().as_bytes().to_vec(),
            signed_prekey: self.signed_prekey.public().as_bytes().to_vec(),
            signed_prekey_signature: self.signed_prekey.signature().to_vec(),
            signed_prekey_id: self.signed_prekey.id,
        }
    }
}

/// Manages local key material and its public projection at the directory.
pub struct KeyPairStore {
    local: Arc<dyn LocalStore>,
    directory: Arc<dyn KeyDirectory>,
}

impl KeyPairStore {
    /// Build a store over the given backends.
    pub fn new(local: Arc<dyn LocalStore>, directory: Arc<dyn KeyDirectory>) -> Self {
        Self { local, directory }
    }

    /// Ensure the device has identity and signed-prekey pairs and that their
    /// public halves are published.
    ///
    /// Idempotent: existing keys are loaded and republished rather than
    /// regenerated, so calling this on every startup is safe.
    ///
    /// # Errors
    ///
    /// [`SessionError::KeyInitialization`] when generation, persistence or
    /// publishing fails; no partially initialized state is left behind in
    /// the directory.
    pub async fn ensure_local_keys(&self, user_id: &str) -> Result<LocalKeys, SessionError> {
        let keys = match self.load_stored(user_id).await? {
            Some(keys) => keys,
            None => {
                let identity = IdentityKeyPair::generate();
                let signed_prekey = SignedPreKeyPair::generate(&identity, FIRST_SIGNED_PREKEY_ID);
                let keys = LocalKeys { identity, signed_prekey };
                self.persist(user_id, &keys).await?;
                debug!(user_id, "generated fresh identity and signed prekey");
                keys
            }
        };

        self.directory
            .publish_bundle(keys.bundle_record(user_id))
            .await
            .map_err(|e| SessionError::KeyInitialization {
                reason: format!("bundle publish failed: {e}"),
            })?;

        Ok(keys)
    }

    /// Load previously initialized keys.
    ///
    /// # Errors
    ///
    /// [`SessionError::KeyInitialization`] when the device has no keys yet.
    pub async fn load_local_keys(&self, user_id: &str) -> Result<LocalKeys, SessionError> {
        self.load_stored(user_id).await?.ok_or_else(|| SessionError::KeyInitialization {
            reason: format!("no local keys for {user_id}"),
        })
    }

    /// Top up the published one-time prekey pool to `target` entries.
    ///
    /// Refills only once the pool has drained below half the target, to
    /// avoid churning the directory on every call. Returns the number of
    /// prekeys added.
    pub async fn replenish_one_time_prekeys(
        &self,
        user_id: &str,
        target: usize,
    ) -> Result<usize, SessionError> {
        let unused = self
            .directory
            .unused_prekey_count(user_id)
            .await
            .map_err(|e| SessionError::Sync { reason: e.to_string() })?;
        if unused * 2 >= target {
            return Ok(0);
        }

        let next_id = self
            .directory
            .max_prekey_id(user_id)
            .await
            .map_err(|e| SessionError::Sync { reason: e.to_string() })?
            .map_or(0, |max| max + 1);

        let needed = target - unused;
        let mut records = Vec::with_capacity(needed);
        for offset in 0..needed {
            let id = next_id + offset as u32;
            let pair = OneTimePreKeyPair::generate(id);

            // Secret persisted before the public is visible to claimants.
            let json = serde_json::to_string(&pair)
                .map_err(|e| SessionError::Storage { reason: e.to_string() })?;
            self.local.put(NS_PREKEYS, &prekey_key(user_id, id), json).await?;

            records.push(UserPreKeyRecord {
                user_id: user_id.to_string(),
                prekey_id: id,
                prekey: pair.public().as_bytes().to_vec(),
                used: false,
            });
        }

        self.directory
            .publish_prekeys(records)
            .await
            .map_err(|e| SessionError::Sync { reason: e.to_string() })?;

        debug!(user_id, added = needed, "replenished one-time prekeys");
        Ok(needed)
    }

    /// Remove and return the one-time prekey secret with the given id.
    ///
    /// Single use: a second take of the same id returns `None`.
    pub async fn take_one_time_prekey(
        &self,
        user_id: &str,
        prekey_id: u32,
    ) -> Result<Option<OneTimePreKeyPair>, SessionError> {
        let key = prekey_key(user_id, prekey_id);
        let Some(json) = self.local.get(NS_PREKEYS, &key).await? else {
            return Ok(None);
        };
        self.local.remove(NS_PREKEYS, &key).await?;

        let pair = serde_json::from_str(&json)
            .map_err(|e| SessionError::Storage { reason: e.to_string() })?;
        Ok(Some(pair))
    }

    async fn load_stored(&self, user_id: &str) -> Result<Option<LocalKeys>, SessionError> {
        let Some(identity_json) = self.local.get(NS_IDENTITY, user_id).await? else {
            return Ok(None);
        };
        let Some(spk_json) = self.local.get(NS_SIGNED_PREKEY, user_id).await? else {
            return Ok(None);
        };

        let identity: IdentityKeyPair = serde_json::from_str(&identity_json)
            .map_err(|e| SessionError::Storage { reason: e.to_string() })?;
        let signed_prekey: SignedPreKeyPair = serde_json::from_str(&spk_json)
            .map_err(|e| SessionError::Storage { reason: e.to_string() })?;
        Ok(Some(LocalKeys { identity, signed_prekey }))
    }

    async fn persist(&self, user_id: &str, keys: &LocalKeys) -> Result<(), SessionError> {
        let identity_json = serde_json::to_string(&keys.identity)
            .map_err(|e| SessionError::Storage { reason: e.to_string() })?;
        let spk_json = serde_json::to_string(&keys.signed_prekey)
            .map_err(|e| SessionError::Storage { reason: e.to_string() })?;

        self.local.put(NS_IDENTITY, user_id, identity_json).await?;
        self.local.put(NS_SIGNED_PREKEY, user_id, spk_json).await?;
        Ok(())
    }
}

fn prekey_key(user_id: &str, prekey_id: u32) -> String {
    format!("{user_id}:{prekey_id}")
}

#[cfg(test)]
mod tests {
    use cachet_directory::MemoryDirectory;

    use super::*;
    use crate::local_store::MemoryLocalStore;

    fn store() -> (KeyPairStore, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        let local = Arc::new(MemoryLocalStore::new());
        (KeyPairStore::new(local, directory.clone()), directory)
    }

    #[tokio::test]
    async fn initialization_is_idempotent() {
        let (store, directory) = store();

        let first = store.ensure_local_keys("alice").await.unwrap();
        let second = store.ensure_local_keys("alice").await.unwrap();

        assert_eq!(first.identity.public().as_bytes(), second.identity.public().as_bytes());
        assert_eq!(first.signed_prekey.id, second.signed_prekey.id);

        let bundle = directory.fetch_bundle("alice").await.unwrap().unwrap();
        assert_eq!(bundle.identity_key, first.identity.public().as_bytes().to_vec());
    }

    #[tokio::test]
    async fn replenish_fills_to_target_and_persists_secrets() {
        let (store, directory) = store();
        store.ensure_local_keys("alice").await.unwrap();

        let added = store.replenish_one_time_prekeys("alice", 10).await.unwrap();
        assert_eq!(added, 10);
        assert_eq!(directory.unused_prekey_count("alice").await.unwrap(), 10);

        // Claim one and verify the matching secret is available exactly once.
        let claimed = directory.claim_prekey("alice").await.unwrap().unwrap();
        let pair = store.take_one_time_prekey("alice", claimed.prekey_id).await.unwrap().unwrap();
        assert_eq!(pair.public().as_bytes().to_vec(), claimed.prekey);

        assert!(store.take_one_time_prekey("alice", claimed.prekey_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replenish_skips_while_pool_is_healthy() {
        let (store, directory) = store();
        store.ensure_local_keys("alice").await.unwrap();
        store.replenish_one_time_prekeys("alice", 10).await.unwrap();

        // Drain below half, then replenish again.
        for _ in 0..6 {
            directory.claim_prekey("alice").await.unwrap();
        }
        assert_eq!(store.replenish_one_time_prekeys("alice", 10).await.unwrap(), 6);

        // Healthy pool: nothing to do.
        assert_eq!(store.replenish_one_time_prekeys("alice", 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replenished_ids_never_repeat() {
        let (store, directory) = store();
        store.ensure_local_keys("alice").await.unwrap();
        store.replenish_one_time_prekeys("alice", 4).await.unwrap();

        for _ in 0..4 {
            directory.claim_prekey("alice").await.unwrap();
        }
        store.replenish_one_time_prekeys("alice", 4).await.unwrap();

        assert_eq!(directory.max_prekey_id("alice").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn loading_without_initialization_fails() {
        let (store, _) = store();
        let err = store.load_local_keys("alice").await.err().unwrap();
        assert!(matches!(err, SessionError::KeyInitialization { .. }));
    }
}
