//! Cachet Cryptographic Primitives
//!
//! Cryptographic building blocks for the Cachet one-to-one chat encryption
//! engine. Pure functions with deterministic outputs wherever possible:
//! nonces are provided by the caller, key generation draws from `OsRng`.
//!
//! # Key Lifecycle
//!
//! An X3DH-style agreement combines long-term, medium-term and ephemeral
//! X25519 keys into a 32-byte root key. The root key seeds two independent
//! symmetric chains (one per direction), and each chain step yields a
//! one-time message key for AEAD encryption.
//!
//! ```text
//! Identity / Signed PreKey / One-Time PreKey / Ephemeral
//!        │
//!        ▼
//! X3DH (3-4 pairwise DH) → Root Key
//!        │
//!        ▼
//! HKDF → Sending Chain + Receiving Chain
//!        │
//!        ▼
//! HMAC Ratchet → Message Keys
//!        │
//!        ▼
//! AEAD Encryption → Ciphertext
//! ```
//!
//! # Security
//!
//! Forward Secrecy:
//! - Chain keys are overwritten after each step; old message keys cannot be
//!   recomputed from current state
//! - One-time prekeys add a fourth DH term that is deleted after a single
//!   handshake
//!
//! Agreement Symmetry:
//! - Both roles of the handshake flow through a single derivation function
//!   ([`derive_root_key`]); the canonical DH ordering and KDF label are
//!   defined exactly once
//!
//! Authenticity:
//! - Signed prekeys carry an XEdDSA signature from the identity key
//! - XChaCha20-Poly1305 rejects any tampered ciphertext

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod agreement;
pub mod cipher;
mod error;
pub mod fingerprint;
pub mod keys;
pub mod ratchet;

pub use agreement::{Agreement, Role, RootKey, derive_root_key, seed_chains};
pub use cipher::{NONCE_SIZE, decrypt, encrypt};
pub use error::CryptoError;
pub use fingerprint::fingerprint;
pub use keys::{
    IdentityKeyPair, OneTimePreKeyPair, PublicKey, PublicKeyBundle, SignedPreKeyPair,
};
pub use ratchet::{ChainKey, MAX_SKIP, MessageKey, advance, advance_to};
