//! Symmetric ratchet for forward-secure message key derivation.
//!
//! A chain key advances through a one-way HMAC step; each step yields a
//! single-use message key. Stepping is a pure function over the chain key,
//! so callers can treat session state as immutable snapshots: every ratchet
//! operation returns the next chain key instead of mutating in place.
//!
//! # Security Properties
//!
//! - Forward Secrecy: a chain key cannot be walked backwards
//! - Key Uniqueness: each counter value produces a distinct message key
//! - Determinism: the same chain key always yields the same key sequence

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key.
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key.
const MESSAGE_LABEL: &[u8] = b"message";

/// Maximum number of counters to skip when catching up to an out-of-order
/// message. Skipping further is treated as session divergence.
pub const MAX_SKIP: u64 = 1000;

/// An evolving chain key. One per direction per session.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ChainKey([u8; 32]);

impl ChainKey {
    /// Reconstruct a chain key from persisted bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes for local persistence.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.0) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }
}

/// A message key derived from the ratchet.
///
/// Used for exactly one AEAD operation and then discarded; the key bytes
/// are wiped on drop.
pub struct MessageKey {
    key: [u8; 32],
    counter: u64,
}

impl MessageKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305 AEAD.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Counter (message sequence number) this key was derived for.
    pub fn counter(&self) -> u64 {
        self.counter
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Advance the chain by one step.
///
/// Returns the next chain key and the message key for `counter` (the
/// pre-increment sequence number of the message being sent or received).
pub fn advance(chain: &ChainKey, counter: u64) -> Result<(ChainKey, MessageKey), CryptoError> {
    if counter == u64::MAX {
        return Err(CryptoError::CounterOverflow { current: counter });
    }

    let message_key = chain.derive(MESSAGE_LABEL);
    let next_chain = ChainKey(chain.derive(CHAIN_LABEL));

    Ok((next_chain, MessageKey { key: message_key, counter }))
}

/// Advance the chain to a specific counter, discarding skipped keys.
///
/// `current` is the chain's position (the next expected counter). If
/// `target == current` this is a single step. If `target > current` the
/// chain steps forward `target - current + 1` times, throwing away the
/// intermediate message keys, which tolerates reordered or lost deliveries
/// up to [`MAX_SKIP`]. A `target` behind `current` is rejected; the chain
/// is never rewound.
pub fn advance_to(
    chain: &ChainKey,
    current: u64,
    target: u64,
) -> Result<(ChainKey, MessageKey), CryptoError> {
    if target < current {
        return Err(CryptoError::CounterStale { current, requested: target });
    }
    if target - current > MAX_SKIP {
        return Err(CryptoError::SkipLimitExceeded { current, requested: target });
    }

    let mut chain = chain.clone();
    let mut counter = current;
    loop {
        let (next_chain, message_key) = advance(&chain, counter)?;
        chain = next_chain;
        if counter == target {
            return Ok((chain, message_key));
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_chain() -> ChainKey {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        ChainKey::from_bytes(seed)
    }

    #[test]
    fn advance_returns_requested_counter() {
        let (_, key) = advance(&test_chain(), 0).unwrap();
        assert_eq!(key.counter(), 0);

        let (_, key) = advance(&test_chain(), 7).unwrap();
        assert_eq!(key.counter(), 7);
    }

    #[test]
    fn advance_produces_unique_keys() {
        let chain0 = test_chain();
        let (chain1, key0) = advance(&chain0, 0).unwrap();
        let (chain2, key1) = advance(&chain1, 1).unwrap();
        let (_, key2) = advance(&chain2, 2).unwrap();

        assert_ne!(key0.key(), key1.key(), "keys must be unique");
        assert_ne!(key1.key(), key2.key(), "keys must be unique");
        assert_ne!(key0.key(), key2.key(), "keys must be unique");
    }

    #[test]
    fn ratchet_is_deterministic() {
        let mut a = test_chain();
        let mut b = test_chain();

        for counter in 0..10 {
            let (next_a, key_a) = advance(&a, counter).unwrap();
            let (next_b, key_b) = advance(&b, counter).unwrap();
            assert_eq!(key_a.key(), key_b.key(), "same chain must produce same keys");
            assert_eq!(next_a.as_bytes(), next_b.as_bytes());
            a = next_a;
            b = next_b;
        }
    }

    #[test]
    fn first_thousand_keys_are_pairwise_distinct() {
        let mut seen = std::collections::HashSet::new();
        let mut chain = test_chain();

        for counter in 0..1000u64 {
            let (next, key) = advance(&chain, counter).unwrap();
            assert!(seen.insert(*key.key()), "duplicate message key at step {counter}");
            chain = next;
        }
    }

    #[test]
    fn advance_does_not_mutate_input() {
        let chain = test_chain();
        let before = *chain.as_bytes();
        let _ = advance(&chain, 0).unwrap();
        assert_eq!(*chain.as_bytes(), before);
    }

    #[test]
    fn advance_to_matches_sequential_advance() {
        // Sequential
        let mut chain = test_chain();
        for counter in 0..5 {
            let (next, _) = advance(&chain, counter).unwrap();
            chain = next;
        }
        let (seq_chain, seq_key) = advance(&chain, 5).unwrap();

        // Skip
        let (skip_chain, skip_key) = advance_to(&test_chain(), 0, 5).unwrap();

        assert_eq!(seq_key.key(), skip_key.key(), "skip and sequential must produce same key");
        assert_eq!(seq_chain.as_bytes(), skip_chain.as_bytes());
    }

    #[test]
    fn advance_to_current_is_single_step() {
        let (chain, key) = advance_to(&test_chain(), 3, 3).unwrap();
        let (expected_chain, expected_key) = advance(&test_chain(), 3).unwrap();
        assert_eq!(key.key(), expected_key.key());
        assert_eq!(chain.as_bytes(), expected_chain.as_bytes());
    }

    #[test]
    fn advance_to_rejects_stale_counter() {
        let result = advance_to(&test_chain(), 6, 3);
        assert!(matches!(
            result,
            Err(CryptoError::CounterStale { current: 6, requested: 3 })
        ));
    }

    #[test]
    fn advance_to_rejects_excessive_skip() {
        let result = advance_to(&test_chain(), 0, MAX_SKIP + 100);
        assert!(matches!(result, Err(CryptoError::SkipLimitExceeded { .. })));
    }

    #[test]
    fn counter_overflow_is_rejected() {
        let result = advance(&test_chain(), u64::MAX);
        assert!(matches!(result, Err(CryptoError::CounterOverflow { .. })));
    }

    proptest! {
        #[test]
        fn skip_equals_stepping(skip in 0u64..200) {
            let mut chain = test_chain();
            for counter in 0..skip {
                let (next, _) = advance(&chain, counter).unwrap();
                chain = next;
            }
            let (_, stepped) = advance(&chain, skip).unwrap();
            let (_, skipped) = advance_to(&test_chain(), 0, skip).unwrap();
            prop_assert_eq!(stepped.key(), skipped.key());
        }

        #[test]
        fn distinct_chains_yield_distinct_keys(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            prop_assume!(a != b);
            let (_, key_a) = advance(&ChainKey::from_bytes(a), 0).unwrap();
            let (_, key_b) = advance(&ChainKey::from_bytes(b), 0).unwrap();
            prop_assert_ne!(key_a.key(), key_b.key());
        }
    }
}
