//! Long-term, medium-term and one-time key material.
//!
//! A single X25519 scalar backs each identity key: it is used in Montgomery
//! form for Diffie-Hellman and in Edwards form (XEdDSA) to sign the device's
//! signed prekey. Secret halves are zeroized on drop and serialized only for
//! local persistence; peers only ever see a [`PublicKeyBundle`].

use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::StaticSecret;
use xeddsa::{
    Sign, Verify,
    xed25519::{PrivateKey as XEdPrivate, PublicKey as XEdPublic},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// X25519 public key, re-exported for downstream crates.
pub use x25519_dalek::PublicKey;

/// Curve identifier prefix for signing prekey public keys (X25519).
const CURVE_ID_X25519: u8 = 0x05;

/// Encode a public key as `curve_id || u_coordinate` for signing (33 bytes).
pub(crate) fn encode_pk(pk: &PublicKey) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = CURVE_ID_X25519;
    out[1..].copy_from_slice(pk.as_bytes());
    out
}

/// Long-term identity key pair.
///
/// The secret scalar serves double duty: Montgomery form for X25519 DH and
/// Edwards form for XEdDSA signatures over signed prekeys. The secret never
/// leaves the device; only [`IdentityKeyPair::public`] is published.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct IdentityKeyPair {
    secret: StaticSecret,
    #[zeroize(skip)]
    public: PublicKey,
    signing: XEdPrivate,
    #[zeroize(skip)]
    verify: XEdPublic,
}

impl IdentityKeyPair {
    /// Generate a fresh identity key pair.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Reconstruct an identity key pair from a persisted secret.
    pub fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&secret);
        let signing = XEdPrivate::from(&secret);
        let verify = XEdPublic::from(&public);
        Self { secret, public, signing, verify }
    }

    /// Reconstruct from raw secret bytes (local persistence).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    /// Montgomery public key (the published identity key).
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Secret scalar for Diffie-Hellman.
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Raw secret bytes for local persistence. Handle with care.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// Sign a prekey public key, binding it to this identity.
    fn sign_prekey(&self, prekey: &PublicKey) -> [u8; 64] {
        self.signing.sign(&encode_pk(prekey), OsRng)
    }
}

impl Serialize for IdentityKeyPair {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // Only the secret scalar is persisted; the rest is derived.
        self.secret.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IdentityKeyPair {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bytes = <[u8; 32]>::deserialize(deserializer)?;
        Ok(Self::from_secret_bytes(bytes))
    }
}

/// Medium-term signed prekey pair.
///
/// Rotated periodically. The signature over the public half proves the
/// prekey belongs to the identity key that published it.
#[derive(Serialize, Deserialize)]
pub struct SignedPreKeyPair {
    /// Numeric identifier referenced by envelopes and bundles.
    pub id: u32,
    #[serde(with = "secret_serde")]
    secret: StaticSecret,
    #[serde(with = "pk_serde")]
    public: PublicKey,
    #[serde(with = "serde_big_array::BigArray")]
    signature: [u8; 64],
}

impl SignedPreKeyPair {
    /// Generate a fresh signed prekey, signed by `identity`.
    pub fn generate(identity: &IdentityKeyPair, id: u32) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let signature = identity.sign_prekey(&public);
        Self { id, secret, public, signature }
    }

    /// Public half for publishing.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Secret half for the responder side of the agreement.
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// XEdDSA signature binding this prekey to the identity key.
    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }
}

/// Single-use one-time prekey pair.
///
/// Drawn from a finite published pool; each is claimed at most once and its
/// secret is deleted after participating in one handshake.
#[derive(Serialize, Deserialize)]
pub struct OneTimePreKeyPair {
    /// Numeric identifier referenced by envelopes and the directory.
    pub id: u32,
    #[serde(with = "secret_serde")]
    secret: StaticSecret,
    #[serde(with = "pk_serde")]
    public: PublicKey,
}

impl OneTimePreKeyPair {
    /// Generate a fresh one-time prekey.
    pub fn generate(id: u32) -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { id, secret, public }
    }

    /// Public half for publishing.
    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    /// Secret half, consumed by the responder side of the agreement.
    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

/// A peer's published public key bundle.
///
/// The only key material ever transmitted to the other side of an
/// agreement. The one-time prekey is present only when the directory had an
/// unclaimed one at fetch time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicKeyBundle {
    /// Peer's long-term identity key.
    #[serde(with = "pk_serde")]
    pub identity: PublicKey,
    /// Peer's current signed prekey.
    #[serde(with = "pk_serde")]
    pub signed_prekey: PublicKey,
    /// Identifier of the signed prekey.
    pub signed_prekey_id: u32,
    /// XEdDSA signature over the signed prekey, made by the identity key.
    #[serde(with = "serde_big_array::BigArray")]
    pub signed_prekey_signature: [u8; 64],
    /// Claimed one-time prekey, if any.
    #[serde(with = "pk_opt_serde")]
    pub one_time_prekey: Option<PublicKey>,
    /// Identifier of the claimed one-time prekey.
    pub one_time_prekey_id: Option<u32>,
}

impl PublicKeyBundle {
    /// Verify the signed-prekey signature against the bundle's identity key.
    ///
    /// # Errors
    ///
    /// [`CryptoError::InvalidSignature`] if the signature does not verify.
    /// A bundle failing this check must not be used for establishment.
    pub fn verify(&self) -> Result<(), CryptoError> {
        let verify = XEdPublic::from(&self.identity);
        verify
            .verify(&encode_pk(&self.signed_prekey), &self.signed_prekey_signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

/// Serde for `StaticSecret` as raw 32 bytes (local persistence only).
mod secret_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use x25519_dalek::StaticSecret;

    pub fn serialize<S: Serializer>(secret: &StaticSecret, s: S) -> Result<S::Ok, S::Error> {
        secret.to_bytes().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StaticSecret, D::Error> {
        let bytes = <[u8; 32]>::deserialize(d)?;
        Ok(StaticSecret::from(bytes))
    }
}

/// Serde for `PublicKey` as raw 32 bytes.
pub(crate) mod pk_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use x25519_dalek::PublicKey;

    pub fn serialize<S: Serializer>(key: &PublicKey, s: S) -> Result<S::Ok, S::Error> {
        key.as_bytes().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<PublicKey, D::Error> {
        let bytes = <[u8; 32]>::deserialize(d)?;
        Ok(PublicKey::from(bytes))
    }
}

/// Serde for `Option<PublicKey>` as optional raw 32 bytes.
pub(crate) mod pk_opt_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use x25519_dalek::PublicKey;

    pub fn serialize<S: Serializer>(key: &Option<PublicKey>, s: S) -> Result<S::Ok, S::Error> {
        key.as_ref().map(PublicKey::as_bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PublicKey>, D::Error> {
        let bytes: Option<[u8; 32]> = Option::deserialize(d)?;
        Ok(bytes.map(PublicKey::from))
    }
}
