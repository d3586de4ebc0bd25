//! Fetching and validating peer key bundles from the directory.

use std::sync::Arc;

use cachet_crypto::{PublicKey, PublicKeyBundle};
use cachet_directory::KeyDirectory;
use tracing::debug;

use crate::error::SessionError;

/// Assembles a verified [`PublicKeyBundle`] for a peer, claiming a one-time
/// prekey when the pool has one.
pub struct BundleFetcher {
    directory: Arc<dyn KeyDirectory>,
}

impl BundleFetcher {
    /// Build a fetcher over the given directory.
    pub fn new(directory: Arc<dyn KeyDirectory>) -> Self {
        Self { directory }
    }

    /// Fetch the peer's bundle and claim one prekey.
    ///
    /// An empty prekey pool is not an error; establishment proceeds with
    /// the three-DH variant. The signed-prekey signature is verified before
    /// the bundle is returned.
    ///
    /// # Errors
    ///
    /// - [`SessionError::BundleUnavailable`] when the peer never published
    /// - [`SessionError::Establishment`] when the directory fails or the
    ///   bundle is malformed or carries an invalid signature
    pub async fn fetch(&self, peer_id: &str) -> Result<PublicKeyBundle, SessionError> {
        let record = self
            .directory
            .fetch_bundle(peer_id)
            .await
            .map_err(|e| SessionError::Establishment { reason: format!("bundle fetch: {e}") })?
            .ok_or_else(|| SessionError::BundleUnavailable { user_id: peer_id.to_string() })?;

        let identity = decode_key(&record.identity_key, "identity key")?;
        let signed_prekey = decode_key(&record.signed_prekey, "signed prekey")?;
        let signed_prekey_signature: [u8; 64] =
            record.signed_prekey_signature.as_slice().try_into().map_err(|_| {
                SessionError::Establishment {
                    reason: format!(
                        "signed prekey signature has {} bytes, expected 64",
                        record.signed_prekey_signature.len()
                    ),
                }
            })?;

        // A claim failure only costs the one-time DH term.
        let claimed = match self.directory.claim_prekey(peer_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                debug!(peer_id, error = %e, "prekey claim failed, proceeding without");
                None
            }
        };
        let (one_time_prekey, one_time_prekey_id) = match claimed {
            Some(claimed) => {
                (Some(decode_key(&claimed.prekey, "one-time prekey")?), Some(claimed.prekey_id))
            }
            None => (None, None),
        };

        let bundle = PublicKeyBundle {
            identity,
            signed_prekey,
            signed_prekey_id: record.signed_prekey_id,
            signed_prekey_signature,
            one_time_prekey,
            one_time_prekey_id,
        };

        bundle.verify().map_err(|e| SessionError::Establishment {
            reason: format!("bundle for {peer_id} failed verification: {e}"),
        })?;

        Ok(bundle)
    }

    /// Fetch just the peer's identity key, without touching their prekey
    /// pool. Used by the responder side, which receives everything else in
    /// the envelope.
    pub async fn fetch_identity(&self, peer_id: &str) -> Result<PublicKey, SessionError> {
        let bytes = self
            .directory
            .fetch_identity_key(peer_id)
            .await
            .map_err(|e| SessionError::Establishment { reason: format!("identity fetch: {e}") })?
            .ok_or_else(|| SessionError::BundleUnavailable { user_id: peer_id.to_string() })?;
        decode_key(&bytes, "identity key")
    }
}

fn decode_key(bytes: &[u8], what: &str) -> Result<PublicKey, SessionError> {
    let array: [u8; 32] = bytes.try_into().map_err(|_| SessionError::Establishment {
        reason: format!("{what} has {} bytes, expected 32", bytes.len()),
    })?;
    Ok(PublicKey::from(array))
}
