//! Identity key fingerprints for out-of-band verification.

use sha2::{Digest, Sha256};

use crate::keys::PublicKey;

/// Number of leading hash bytes rendered in a fingerprint.
const FINGERPRINT_BYTES: usize = 20;

/// Hex characters per display group.
const GROUP_WIDTH: usize = 5;

/// Human-comparable fingerprint of an identity key.
///
/// SHA-256 of the public key, leading 20 bytes, upper-case hex in
/// fixed-width groups of five characters separated by spaces. Two users
/// comparing fingerprints over a trusted channel can detect a
/// machine-in-the-middle substituting identity keys.
pub fn fingerprint(identity: &PublicKey) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    let hex = hex::encode_upper(&digest[..FINGERPRINT_BYTES]);

    hex.as_bytes()
        .chunks(GROUP_WIDTH)
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;

    #[test]
    fn fingerprint_is_deterministic() {
        let identity = IdentityKeyPair::generate();
        assert_eq!(fingerprint(identity.public()), fingerprint(identity.public()));
    }

    #[test]
    fn different_keys_have_different_fingerprints() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        assert_ne!(fingerprint(a.public()), fingerprint(b.public()));
    }

    #[test]
    fn fingerprint_has_fixed_shape() {
        let identity = IdentityKeyPair::generate();
        let fp = fingerprint(identity.public());

        // 40 hex characters in 8 groups of 5 plus 7 separators.
        assert_eq!(fp.len(), 47);
        let groups: Vec<&str> = fp.split(' ').collect();
        assert_eq!(groups.len(), 8);
        for group in groups {
            assert_eq!(group.len(), GROUP_WIDTH);
            assert!(group.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(!group.chars().any(|c| c.is_ascii_lowercase()));
        }
    }
}
