//! The `KeyDirectory` trait consumed by the session engine.

use async_trait::async_trait;

use crate::{
    error::DirectoryError,
    types::{SnapshotKey, UserKeyBundleRecord, UserPreKeyRecord},
};

/// A one-time prekey returned by an atomic claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedPreKey {
    /// Identifier of the claimed prekey.
    pub prekey_id: u32,
    /// Prekey public key.
    pub prekey: Vec<u8>,
}

/// Key-directory collaborator.
///
/// All operations are asynchronous and may fail transiently; callers wrap
/// them in timeouts and treat a timeout like any other failure. A given
/// implementation must make [`claim_prekey`](Self::claim_prekey) atomic:
/// concurrent claimants (e.g. two devices of the same user establishing
/// sessions at once) each receive a different prekey, or none.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Upsert a user's key bundle row.
    async fn publish_bundle(&self, record: UserKeyBundleRecord) -> Result<(), DirectoryError>;

    /// Insert new one-time prekey rows for a user.
    ///
    /// Ids must not collide with existing rows for the same user.
    async fn publish_prekeys(&self, records: Vec<UserPreKeyRecord>) -> Result<(), DirectoryError>;

    /// Fetch a user's bundle row. `None` if the user never published.
    async fn fetch_bundle(
        &self,
        user_id: &str,
    ) -> Result<Option<UserKeyBundleRecord>, DirectoryError>;

    /// Atomically claim one unused prekey, marking it used in the same
    /// operation. `None` when the pool is exhausted.
    async fn claim_prekey(&self, user_id: &str) -> Result<Option<ClaimedPreKey>, DirectoryError>;

    /// Number of unused prekeys remaining for a user.
    async fn unused_prekey_count(&self, user_id: &str) -> Result<usize, DirectoryError>;

    /// Highest prekey id ever published for a user, used or not.
    /// Replenishment continues numbering from here.
    async fn max_prekey_id(&self, user_id: &str) -> Result<Option<u32>, DirectoryError>;

    /// Fetch just the identity key from a user's bundle.
    async fn fetch_identity_key(&self, user_id: &str) -> Result<Option<Vec<u8>>, DirectoryError> {
        Ok(self.fetch_bundle(user_id).await?.map(|bundle| bundle.identity_key))
    }

    /// Best-effort mirror of an (opaque) session snapshot for cross-device
    /// continuity. The engine treats failures here as soft.
    async fn store_session_snapshot(
        &self,
        key: SnapshotKey,
        snapshot: Vec<u8>,
    ) -> Result<(), DirectoryError>;

    /// Load a previously mirrored session snapshot.
    async fn load_session_snapshot(
        &self,
        key: &SnapshotKey,
    ) -> Result<Option<Vec<u8>>, DirectoryError>;

    /// Remove a mirrored snapshot (session repair or logout).
    async fn clear_session_snapshot(&self, key: &SnapshotKey) -> Result<(), DirectoryError>;
}
