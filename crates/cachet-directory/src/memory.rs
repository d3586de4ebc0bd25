//! In-memory key directory.
//!
//! Backs tests and single-process deployments. All rows live behind one
//! mutex, which is what makes the claim operation atomic: finding an unused
//! prekey and marking it used happen under the same lock acquisition.

#![allow(clippy::expect_used, reason = "Mutex poisoning should cause a panic")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tracing::debug;

use crate::{
    directory::{ClaimedPreKey, KeyDirectory},
    error::DirectoryError,
    types::{SnapshotKey, UserKeyBundleRecord, UserPreKeyRecord},
};

/// In-memory [`KeyDirectory`] implementation.
///
/// Thread-safe via `Arc<Mutex<_>>`. Clone shares the same underlying rows,
/// so one instance can serve every simulated user in a test.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    inner: Arc<Mutex<MemoryDirectoryInner>>,
}

#[derive(Default)]
struct MemoryDirectoryInner {
    bundles: HashMap<String, UserKeyBundleRecord>,
    prekeys: HashMap<String, Vec<UserPreKeyRecord>>,
    snapshots: HashMap<SnapshotKey, Vec<u8>>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total prekey rows stored for a user, used or not. Test visibility.
    pub fn prekey_row_count(&self, user_id: &str) -> usize {
        let inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        inner.prekeys.get(user_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl KeyDirectory for MemoryDirectory {
    async fn publish_bundle(&self, record: UserKeyBundleRecord) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        debug!(user_id = %record.user_id, "bundle published");
        inner.bundles.insert(record.user_id.clone(), record);
        Ok(())
    }

    async fn publish_prekeys(&self, records: Vec<UserPreKeyRecord>) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        for record in records {
            let rows = inner.prekeys.entry(record.user_id.clone()).or_default();
            if rows.iter().any(|row| row.prekey_id == record.prekey_id) {
                return Err(DirectoryError::Serialization {
                    reason: format!(
                        "duplicate prekey id {} for user {}",
                        record.prekey_id, record.user_id
                    ),
                });
            }
            rows.push(record);
        }
        Ok(())
    }

    async fn fetch_bundle(
        &self,
        user_id: &str,
    ) -> Result<Option<UserKeyBundleRecord>, DirectoryError> {
        let inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        Ok(inner.bundles.get(user_id).cloned())
    }

    async fn claim_prekey(&self, user_id: &str) -> Result<Option<ClaimedPreKey>, DirectoryError> {
        // Find-and-mark under one lock acquisition; at most one claimant
        // can observe any given row as unused.
        let mut inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        let Some(rows) = inner.prekeys.get_mut(user_id) else {
            return Ok(None);
        };

        let Some(row) = rows.iter_mut().find(|row| !row.used) else {
            debug!(user_id, "prekey pool exhausted");
            return Ok(None);
        };

        row.used = true;
        Ok(Some(ClaimedPreKey { prekey_id: row.prekey_id, prekey: row.prekey.clone() }))
    }

    async fn unused_prekey_count(&self, user_id: &str) -> Result<usize, DirectoryError> {
        let inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        Ok(inner
            .prekeys
            .get(user_id)
            .map_or(0, |rows| rows.iter().filter(|row| !row.used).count()))
    }

    async fn max_prekey_id(&self, user_id: &str) -> Result<Option<u32>, DirectoryError> {
        let inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        Ok(inner
            .prekeys
            .get(user_id)
            .and_then(|rows| rows.iter().map(|row| row.prekey_id).max()))
    }

    async fn store_session_snapshot(
        &self,
        key: SnapshotKey,
        snapshot: Vec<u8>,
    ) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        inner.snapshots.insert(key, snapshot);
        Ok(())
    }

    async fn load_session_snapshot(
        &self,
        key: &SnapshotKey,
    ) -> Result<Option<Vec<u8>>, DirectoryError> {
        let inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        Ok(inner.snapshots.get(key).cloned())
    }

    async fn clear_session_snapshot(&self, key: &SnapshotKey) -> Result<(), DirectoryError> {
        let mut inner = self.inner.lock().expect("MemoryDirectory mutex poisoned");
        inner.snapshots.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prekey_row(user: &str, id: u32) -> UserPreKeyRecord {
        UserPreKeyRecord {
            user_id: user.to_string(),
            prekey_id: id,
            prekey: vec![id as u8; 32],
            used: false,
        }
    }

    #[tokio::test]
    async fn publish_and_fetch_bundle() {
        let directory = MemoryDirectory::new();
        let record = UserKeyBundleRecord {
            user_id: "alice".to_string(),
            identity_key: vec![1; 32],
            signed_prekey: vec![2; 32],
            signed_prekey_signature: vec![3; 64],
            signed_prekey_id: 1,
        };

        directory.publish_bundle(record.clone()).await.unwrap();
        let fetched = directory.fetch_bundle("alice").await.unwrap();
        assert_eq!(fetched, Some(record));

        assert_eq!(directory.fetch_bundle("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn publish_bundle_upserts() {
        let directory = MemoryDirectory::new();
        let mut record = UserKeyBundleRecord {
            user_id: "alice".to_string(),
            identity_key: vec![1; 32],
            signed_prekey: vec![2; 32],
            signed_prekey_signature: vec![3; 64],
            signed_prekey_id: 1,
        };

        directory.publish_bundle(record.clone()).await.unwrap();
        record.signed_prekey_id = 2;
        directory.publish_bundle(record.clone()).await.unwrap();

        let fetched = directory.fetch_bundle("alice").await.unwrap().unwrap();
        assert_eq!(fetched.signed_prekey_id, 2);
    }

    #[tokio::test]
    async fn claim_marks_used_exactly_once() {
        let directory = MemoryDirectory::new();
        directory.publish_prekeys(vec![prekey_row("bob", 1)]).await.unwrap();

        let first = directory.claim_prekey("bob").await.unwrap();
        assert_eq!(first.map(|c| c.prekey_id), Some(1));

        // Pool exhausted; the same row can never be claimed again.
        assert_eq!(directory.claim_prekey("bob").await.unwrap(), None);
        assert_eq!(directory.unused_prekey_count("bob").await.unwrap(), 0);
        assert_eq!(directory.prekey_row_count("bob"), 1);
    }

    #[tokio::test]
    async fn claim_from_unknown_user_is_none() {
        let directory = MemoryDirectory::new();
        assert_eq!(directory.claim_prekey("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_prekey_ids_are_rejected() {
        let directory = MemoryDirectory::new();
        directory.publish_prekeys(vec![prekey_row("bob", 1)]).await.unwrap();

        let result = directory.publish_prekeys(vec![prekey_row("bob", 1)]).await;
        assert!(matches!(result, Err(DirectoryError::Serialization { .. })));
    }

    #[tokio::test]
    async fn max_prekey_id_counts_used_rows() {
        let directory = MemoryDirectory::new();
        directory
            .publish_prekeys(vec![prekey_row("bob", 1), prekey_row("bob", 7)])
            .await
            .unwrap();

        // Claim everything; the high-water mark must survive.
        let _ = directory.claim_prekey("bob").await.unwrap();
        let _ = directory.claim_prekey("bob").await.unwrap();

        assert_eq!(directory.max_prekey_id("bob").await.unwrap(), Some(7));
        assert_eq!(directory.max_prekey_id("carol").await.unwrap(), None);
    }

    #[tokio::test]
    async fn snapshots_store_and_clear() {
        let directory = MemoryDirectory::new();
        let key = SnapshotKey {
            user_id: "alice".to_string(),
            peer_id: "bob".to_string(),
            conversation_id: "c1".to_string(),
        };

        directory.store_session_snapshot(key.clone(), vec![9, 9, 9]).await.unwrap();
        assert_eq!(
            directory.load_session_snapshot(&key).await.unwrap(),
            Some(vec![9, 9, 9])
        );

        directory.clear_session_snapshot(&key).await.unwrap();
        assert_eq!(directory.load_session_snapshot(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clone_shares_state() {
        let directory = MemoryDirectory::new();
        let clone = directory.clone();

        directory.publish_prekeys(vec![prekey_row("bob", 1)]).await.unwrap();
        assert_eq!(clone.unused_prekey_count("bob").await.unwrap(), 1);
    }
}
