//! Error taxonomy for the session engine.
//!
//! Every public operation returns an explicit `Result` so the calling UI
//! can degrade gracefully (render an "undecryptable" placeholder, prompt
//! for repair) instead of crashing the chat.

use thiserror::Error;

/// Errors from session engine operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Local key generation, persistence or publishing failed. Fatal for
    /// this device until resolved.
    #[error("key initialization failed: {reason}")]
    KeyInitialization {
        /// What failed
        reason: String,
    },

    /// The peer has published no key bundle; messaging them is impossible
    /// until they initialize.
    #[error("no key bundle published for {user_id}")]
    BundleUnavailable {
        /// The peer missing a bundle
        user_id: String,
    },

    /// Agreement inputs were missing or invalid; no session was created.
    #[error("session establishment failed: {reason}")]
    Establishment {
        /// What failed
        reason: String,
    },

    /// A single message could not be encrypted.
    #[error("encryption failed: {reason}")]
    Encryption {
        /// What failed
        reason: String,
    },

    /// A single message could not be decrypted (duplicate counter, legacy
    /// version, bad envelope). The session itself remains usable.
    #[error("decryption failed: {reason}")]
    Decryption {
        /// What failed
        reason: String,
    },

    /// Ratchet state has diverged from the peer. Recoverable only by
    /// repair; messages from before the repair stay undecryptable.
    #[error("session mismatch: {reason}")]
    SessionMismatch {
        /// Evidence of the divergence
        reason: String,
    },

    /// Best-effort directory mirror or lookup failed; local session state
    /// remains usable.
    #[error("directory sync failed: {reason}")]
    Sync {
        /// What the directory reported
        reason: String,
    },

    /// Local persistent storage failed.
    #[error("storage failed: {reason}")]
    Storage {
        /// What the store reported
        reason: String,
    },

    /// A directory call exceeded the configured timeout. Treated exactly
    /// like a failure response; no partial state is kept.
    #[error("timed out during {operation}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
    },
}

impl SessionError {
    /// Returns true if retrying the operation may succeed without any
    /// state change.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Sync { .. })
    }

    /// Returns true if only [`repair`](crate::Engine::repair_session) can
    /// recover the session.
    pub fn requires_repair(&self) -> bool {
        matches!(self, Self::SessionMismatch { .. })
    }
}
