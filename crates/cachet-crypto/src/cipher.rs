//! Message encryption using `XChaCha20-Poly1305`.
//!
//! Pure functions: the nonce is provided by the caller. The session engine
//! draws a fresh random nonce per message; reusing a nonce under the same
//! message key breaks the AEAD, which is why message keys are single-use.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::error::CryptoError;

/// XChaCha20 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;

/// Encrypt plaintext under a single-use message key.
///
/// Returns the ciphertext including the 16-byte Poly1305 tag.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32], nonce: &[u8; NONCE_SIZE]) -> Vec<u8> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(nonce), plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    ciphertext
}

/// Decrypt ciphertext under a single-use message key.
///
/// # Errors
///
/// [`CryptoError::DecryptionFailed`] when the authentication tag does not
/// verify (wrong key, wrong nonce or tampered ciphertext). Never returns
/// empty plaintext for an authentication failure.
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_SIZE],
    key: &[u8; 32],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher.decrypt(XNonce::from_slice(nonce), ciphertext).map_err(|_| {
        CryptoError::DecryptionFailed { reason: "authentication failed".to_string() }
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const TEST_KEY: [u8; 32] = [0x42; 32];
    const TEST_NONCE: [u8; NONCE_SIZE] = [0x07; NONCE_SIZE];

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let ciphertext = encrypt(b"Hello, World!", &TEST_KEY, &TEST_NONCE);
        let plaintext = decrypt(&ciphertext, &TEST_NONCE, &TEST_KEY).unwrap();
        assert_eq!(plaintext, b"Hello, World!");
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let ciphertext = encrypt(b"", &TEST_KEY, &TEST_NONCE);
        let plaintext = decrypt(&ciphertext, &TEST_NONCE, &TEST_KEY).unwrap();
        assert_eq!(plaintext, b"");
    }

    #[test]
    fn large_plaintext_roundtrips() {
        let plaintext = vec![0xABu8; 64 * 1024];
        let ciphertext = encrypt(&plaintext, &TEST_KEY, &TEST_NONCE);
        let decrypted = decrypt(&ciphertext, &TEST_NONCE, &TEST_KEY).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn ciphertext_includes_tag() {
        let ciphertext = encrypt(b"test message", &TEST_KEY, &TEST_NONCE);
        assert_eq!(ciphertext.len(), b"test message".len() + 16);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let ciphertext = encrypt(b"secret", &TEST_KEY, &TEST_NONCE);
        let wrong_key = [0x43; 32];
        let result = decrypt(&ciphertext, &TEST_NONCE, &wrong_key);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn wrong_nonce_fails_authentication() {
        let ciphertext = encrypt(b"secret", &TEST_KEY, &TEST_NONCE);
        let wrong_nonce = [0x08; NONCE_SIZE];
        let result = decrypt(&ciphertext, &wrong_nonce, &TEST_KEY);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let mut ciphertext = encrypt(b"original", &TEST_KEY, &TEST_NONCE);
        ciphertext[0] ^= 0xFF;
        let result = decrypt(&ciphertext, &TEST_NONCE, &TEST_KEY);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed { .. })));
    }

    proptest! {
        #[test]
        fn roundtrip_any_plaintext_any_key(
            plaintext in prop::collection::vec(any::<u8>(), 0..512),
            key in any::<[u8; 32]>(),
            nonce in any::<[u8; NONCE_SIZE]>(),
        ) {
            let ciphertext = encrypt(&plaintext, &key, &nonce);
            let decrypted = decrypt(&ciphertext, &nonce, &key).unwrap();
            prop_assert_eq!(decrypted, plaintext);
        }
    }
}
