//! Error types for cryptographic operations

use thiserror::Error;

/// Errors from key agreement, ratchet and cipher operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Signed-prekey signature did not verify against the identity key
    #[error("prekey signature verification failed")]
    InvalidSignature,

    /// Key material had the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// Chain counter would overflow
    #[error("chain counter overflow at {current}")]
    CounterOverflow {
        /// Current counter when overflow was detected
        current: u64,
    },

    /// Requested counter is behind the chain position (duplicate or stale
    /// message). The chain is never rewound.
    #[error("counter {requested} is behind chain position {current}")]
    CounterStale {
        /// Current chain position
        current: u64,
        /// Requested counter
        requested: u64,
    },

    /// Requested counter is too far ahead of the chain position
    #[error("counter {requested} exceeds skip limit from position {current}")]
    SkipLimitExceeded {
        /// Current chain position
        current: u64,
        /// Requested counter
        requested: u64,
    },

    /// AEAD decryption failed (authentication tag mismatch)
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },
}

impl CryptoError {
    /// Returns true if this error indicates diverged session state.
    ///
    /// Divergence errors are only recoverable by re-establishing the
    /// session. Stale counters are not divergence: they are expected for
    /// duplicate or badly delayed messages.
    pub fn indicates_divergence(&self) -> bool {
        matches!(self, Self::DecryptionFailed { .. } | Self::SkipLimitExceeded { .. })
    }
}
