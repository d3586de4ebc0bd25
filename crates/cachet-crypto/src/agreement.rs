//! X3DH-style initial key agreement.
//!
//! Both parties combine three (or four, when a one-time prekey was claimed)
//! pairwise Diffie-Hellman values into a 32-byte root key. The canonical DH
//! ordering, the domain separator and the KDF label are defined exactly once
//! in [`derive_root_key`]; the two roles differ only in which side supplies
//! secrets. This single-sourcing is load-bearing: independently assembled
//! copies drift apart and produce sessions that silently fail to decrypt.
//!
//! Canonical ordering (A = initiator, B = responder):
//!
//! ```text
//! DH1 = IK_A  × SPK_B
//! DH2 = EK_A  × IK_B
//! DH3 = EK_A  × SPK_B
//! DH4 = EK_A  × OPK_B    (only when a one-time prekey participates)
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::StaticSecret;
use zeroize::{Zeroize, Zeroizing};

use crate::{keys::PublicKey, ratchet::ChainKey};

/// HKDF info label for root key derivation.
const ROOT_LABEL: &[u8] = b"cachet-x3dh-v1";

/// HKDF info label for the chain flowing initiator -> responder.
const INITIATOR_CHAIN_LABEL: &[u8] = b"cachet-chain-initiator";

/// HKDF info label for the chain flowing responder -> initiator.
const RESPONDER_CHAIN_LABEL: &[u8] = b"cachet-chain-responder";

/// Which side of the handshake we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We sent the first message (fetched the peer's bundle).
    Initiator,
    /// We received a first message carrying an embedded ephemeral key.
    Responder,
}

/// Root key produced by the agreement. Never used directly for encryption;
/// it only seeds the two symmetric chains. Wiped from memory on drop.
pub struct RootKey(Zeroizing<[u8; 32]>);

impl RootKey {
    /// Raw bytes, for seeding chains and local persistence.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Reconstruct a root key from persisted bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

/// Agreement inputs, parameterized by role.
///
/// The initiator holds its own identity and ephemeral secrets plus the
/// peer's bundle publics; the responder holds its identity, signed-prekey
/// and (optionally) one-time-prekey secrets plus the initiator's publics.
pub enum Agreement<'a> {
    /// Initiator-side inputs.
    Initiator {
        /// Our long-term identity secret.
        our_identity: &'a StaticSecret,
        /// Our freshly generated ephemeral secret.
        our_ephemeral: &'a StaticSecret,
        /// Peer's published identity key.
        their_identity: &'a PublicKey,
        /// Peer's published signed prekey.
        their_signed_prekey: &'a PublicKey,
        /// Claimed one-time prekey, if the directory had one.
        their_one_time_prekey: Option<&'a PublicKey>,
    },
    /// Responder-side inputs.
    Responder {
        /// Our long-term identity secret.
        our_identity: &'a StaticSecret,
        /// Our signed-prekey secret matching the id the initiator used.
        our_signed_prekey: &'a StaticSecret,
        /// Our one-time-prekey secret, present iff the initiator claimed one.
        our_one_time_prekey: Option<&'a StaticSecret>,
        /// Initiator's published identity key.
        their_identity: &'a PublicKey,
        /// Initiator's ephemeral key from the first envelope.
        their_ephemeral: &'a PublicKey,
    },
}

impl Agreement<'_> {
    /// Our role in this agreement.
    pub fn role(&self) -> Role {
        match self {
            Agreement::Initiator { .. } => Role::Initiator,
            Agreement::Responder { .. } => Role::Responder,
        }
    }
}

/// Derive the shared 32-byte root key from the agreement inputs.
///
/// Both roles produce the DH values in the same canonical order and run
/// them through the same KDF; given matching inputs, initiator and
/// responder derive identical root keys.
pub fn derive_root_key(agreement: &Agreement<'_>) -> RootKey {
    let (dh1, dh2, dh3, dh4) = match agreement {
        Agreement::Initiator {
            our_identity,
            our_ephemeral,
            their_identity,
            their_signed_prekey,
            their_one_time_prekey,
        } => (
            our_identity.diffie_hellman(their_signed_prekey).to_bytes(),
            our_ephemeral.diffie_hellman(their_identity).to_bytes(),
            our_ephemeral.diffie_hellman(their_signed_prekey).to_bytes(),
            their_one_time_prekey.map(|opk| our_ephemeral.diffie_hellman(opk).to_bytes()),
        ),
        Agreement::Responder {
            our_identity,
            our_signed_prekey,
            our_one_time_prekey,
            their_identity,
            their_ephemeral,
        } => (
            our_signed_prekey.diffie_hellman(their_identity).to_bytes(),
            our_identity.diffie_hellman(their_ephemeral).to_bytes(),
            our_signed_prekey.diffie_hellman(their_ephemeral).to_bytes(),
            our_one_time_prekey.map(|opk| opk.diffie_hellman(their_ephemeral).to_bytes()),
        ),
    };

    // Domain separator followed by the DH values in canonical order.
    let mut ikm = Zeroizing::new(Vec::with_capacity(32 + 32 * 4));
    ikm.extend_from_slice(&[0xffu8; 32]);
    ikm.extend_from_slice(&dh1);
    ikm.extend_from_slice(&dh2);
    ikm.extend_from_slice(&dh3);
    if let Some(dh4) = &dh4 {
        ikm.extend_from_slice(dh4);
    }

    // Zero salt per the X3DH construction.
    let salt = [0u8; 32];
    let hkdf = Hkdf::<Sha256>::new(Some(&salt), &ikm);

    let mut root = [0u8; 32];
    let Ok(()) = hkdf.expand(ROOT_LABEL, &mut root) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    let mut dh1 = dh1;
    let mut dh2 = dh2;
    let mut dh3 = dh3;
    dh1.zeroize();
    dh2.zeroize();
    dh3.zeroize();
    if let Some(mut dh4) = dh4 {
        dh4.zeroize();
    }

    RootKey(Zeroizing::new(root))
}

/// Seed the sending and receiving chains from the root key.
///
/// Returns `(sending_chain, receiving_chain)` for the given role. The
/// chains are direction-labelled relative to the initiator, so the
/// initiator's sending chain is the responder's receiving chain.
pub fn seed_chains(root: &RootKey, role: Role) -> (ChainKey, ChainKey) {
    let initiator_chain = expand_chain(root, INITIATOR_CHAIN_LABEL);
    let responder_chain = expand_chain(root, RESPONDER_CHAIN_LABEL);

    match role {
        Role::Initiator => (initiator_chain, responder_chain),
        Role::Responder => (responder_chain, initiator_chain),
    }
}

fn expand_chain(root: &RootKey, label: &[u8]) -> ChainKey {
    let hkdf = Hkdf::<Sha256>::from_prk(root.as_bytes());
    let Ok(hkdf) = hkdf else {
        unreachable!("32 bytes is a valid HKDF-SHA256 PRK length");
    };

    let mut chain = [0u8; 32];
    let Ok(()) = hkdf.expand(label, &mut chain) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    ChainKey::from_bytes(chain)
}
