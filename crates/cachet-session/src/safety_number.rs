//! Safety numbers for out-of-band identity verification.
//!
//! Both parties compute the same string from the pair of published identity
//! keys: each key is fingerprinted independently and the two fingerprints
//! are sorted lexicographically, so neither side needs to know who computes
//! first. A change in the safety number means an identity key changed.

use std::sync::Arc;

use cachet_crypto::{PublicKey, fingerprint};
use cachet_directory::KeyDirectory;

use crate::error::SessionError;

/// Computes order-independent safety numbers from directory identity keys.
pub struct SafetyNumberService {
    directory: Arc<dyn KeyDirectory>,
}

impl SafetyNumberService {
    /// Build a service over the given directory.
    pub fn new(directory: Arc<dyn KeyDirectory>) -> Self {
        Self { directory }
    }

    /// Safety number for the conversation between `local_user` and `peer`.
    ///
    /// # Errors
    ///
    /// - [`SessionError::BundleUnavailable`] when either party has no
    ///   published identity key
    /// - [`SessionError::Sync`] when the directory fails
    pub async fn safety_number(
        &self,
        local_user: &str,
        peer: &str,
    ) -> Result<String, SessionError> {
        let local_key = self.identity_key(local_user).await?;
        let peer_key = self.identity_key(peer).await?;

        let mut fingerprints = [fingerprint(&local_key), fingerprint(&peer_key)];
        fingerprints.sort();
        Ok(fingerprints.join("\n"))
    }

    async fn identity_key(&self, user_id: &str) -> Result<PublicKey, SessionError> {
        let bytes = self
            .directory
            .fetch_identity_key(user_id)
            .await
            .map_err(|e| SessionError::Sync { reason: e.to_string() })?
            .ok_or_else(|| SessionError::BundleUnavailable { user_id: user_id.to_string() })?;

        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| SessionError::Sync {
            reason: format!("identity key for {user_id} has {} bytes, expected 32", bytes.len()),
        })?;
        Ok(PublicKey::from(array))
    }
}
