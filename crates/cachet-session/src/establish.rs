//! Session establishment: turning key material into ratchet state.
//!
//! [`initiate`] runs the initiator side against a fetched bundle and
//! [`respond`] runs the responder side against the establishment material
//! embedded in a first envelope. Both are synchronous and pure; the engine
//! does the fetching, persisting and locking around them.

use cachet_crypto::{
    Agreement, IdentityKeyPair, OneTimePreKeyPair, PublicKey, PublicKeyBundle, Role,
    SignedPreKeyPair, derive_root_key, seed_chains,
};
use rand::rngs::OsRng;
use x25519_dalek::StaticSecret;

use crate::error::SessionError;
use crate::state::SessionState;

/// Establish the initiator side of a session from a peer's verified bundle.
///
/// Generates a fresh ephemeral pair whose secret is dropped as soon as the
/// root key is derived; only the public survives, embedded in outgoing
/// envelopes until the peer has demonstrably processed one.
///
/// # Errors
///
/// [`SessionError::Establishment`] when the bundle's signed-prekey
/// signature does not verify.
pub fn initiate(
    our_identity: &IdentityKeyPair,
    bundle: &PublicKeyBundle,
) -> Result<SessionState, SessionError> {
    bundle.verify().map_err(|e| SessionError::Establishment {
        reason: format!("bundle verification: {e}"),
    })?;

    let ephemeral = StaticSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);

    let root = derive_root_key(&Agreement::Initiator {
        our_identity: our_identity.secret(),
        our_ephemeral: &ephemeral,
        their_identity: &bundle.identity,
        their_signed_prekey: &bundle.signed_prekey,
        their_one_time_prekey: bundle.one_time_prekey.as_ref(),
    });
    let (sending_chain, receiving_chain) = seed_chains(&root, Role::Initiator);

    Ok(SessionState {
        root_key: *root.as_bytes(),
        sending_chain,
        receiving_chain,
        send_counter: 0,
        receive_counter: 0,
        peer_identity: *bundle.identity.as_bytes(),
        peer_signed_prekey: *bundle.signed_prekey.as_bytes(),
        peer_signed_prekey_id: bundle.signed_prekey_id,
        peer_ephemeral: None,
        local_ephemeral_public: Some(*ephemeral_public.as_bytes()),
        pending_ephemeral: true,
        claimed_prekey_id: bundle.one_time_prekey_id,
    })
}

/// Establish the responder side from a first envelope's material.
///
/// `one_time_prekey` must be `Some` exactly when the initiator claimed one;
/// a disagreement here produces a root key that will never match and every
/// decryption will fail, so the engine resolves the prekey id from the
/// envelope before calling this.
///
/// # Errors
///
/// [`SessionError::Establishment`] when the envelope references a signed
/// prekey id this device does not hold.
pub fn respond(
    our_identity: &IdentityKeyPair,
    our_signed_prekey: &SignedPreKeyPair,
    one_time_prekey: Option<&OneTimePreKeyPair>,
    their_identity: &PublicKey,
    their_ephemeral: &PublicKey,
    envelope_signed_prekey_id: u32,
) -> Result<SessionState, SessionError> {
    if envelope_signed_prekey_id != our_signed_prekey.id {
        return Err(SessionError::Establishment {
            reason: format!(
                "envelope references signed prekey {envelope_signed_prekey_id}, we hold {}",
                our_signed_prekey.id
            ),
        });
    }

    let root = derive_root_key(&Agreement::Responder {
        our_identity: our_identity.secret(),
        our_signed_prekey: our_signed_prekey.secret(),
        our_one_time_prekey: one_time_prekey.map(OneTimePreKeyPair::secret),
        their_identity,
        their_ephemeral,
    });
    let (sending_chain, receiving_chain) = seed_chains(&root, Role::Responder);

    Ok(SessionState {
        root_key: *root.as_bytes(),
        sending_chain,
        receiving_chain,
        send_counter: 0,
        receive_counter: 0,
        peer_identity: *their_identity.as_bytes(),
        peer_signed_prekey: *our_signed_prekey.public().as_bytes(),
        peer_signed_prekey_id: our_signed_prekey.id,
        peer_ephemeral: Some(*their_ephemeral.as_bytes()),
        local_ephemeral_public: None,
        pending_ephemeral: false,
        claimed_prekey_id: one_time_prekey.map(|otk| otk.id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Peers {
        alice: IdentityKeyPair,
        bob: IdentityKeyPair,
        bob_spk: SignedPreKeyPair,
        bob_otk: OneTimePreKeyPair,
    }

    impl Peers {
        fn generate() -> Self {
            let bob = IdentityKeyPair::generate();
            let bob_spk = SignedPreKeyPair::generate(&bob, 1);
            Self {
                alice: IdentityKeyPair::generate(),
                bob,
                bob_spk,
                bob_otk: OneTimePreKeyPair::generate(5),
            }
        }

        fn bob_bundle(&self, with_otk: bool) -> PublicKeyBundle {
            PublicKeyBundle {
                identity: *self.bob.public(),
                signed_prekey: *self.bob_spk.public(),
                signed_prekey_id: self.bob_spk.id,
                signed_prekey_signature: *self.bob_spk.signature(),
                one_time_prekey: with_otk.then(|| *self.bob_otk.public()),
                one_time_prekey_id: with_otk.then_some(self.bob_otk.id),
            }
        }
    }

    fn establish_pair(with_otk: bool) -> (SessionState, SessionState) {
        let peers = Peers::generate();
        let alice_session = initiate(&peers.alice, &peers.bob_bundle(with_otk)).unwrap();

        let ephemeral_bytes = alice_session.local_ephemeral_public.unwrap();
        let bob_session = respond(
            &peers.bob,
            &peers.bob_spk,
            with_otk.then_some(&peers.bob_otk),
            peers.alice.public(),
            &PublicKey::from(ephemeral_bytes),
            1,
        )
        .unwrap();

        (alice_session, bob_session)
    }

    #[test]
    fn both_sides_derive_matching_chains() {
        for with_otk in [false, true] {
            let (alice, bob) = establish_pair(with_otk);
            assert_eq!(alice.root_key, bob.root_key);
            assert_eq!(alice.sending_chain.as_bytes(), bob.receiving_chain.as_bytes());
            assert_eq!(alice.receiving_chain.as_bytes(), bob.sending_chain.as_bytes());
        }
    }

    #[test]
    fn initiator_keeps_establishment_material_pending() {
        let (alice, bob) = establish_pair(true);
        assert!(alice.pending_ephemeral);
        assert!(alice.local_ephemeral_public.is_some());
        assert_eq!(alice.claimed_prekey_id, Some(5));

        assert!(!bob.pending_ephemeral);
        assert_eq!(bob.peer_ephemeral, alice.local_ephemeral_public);
    }

    #[test]
    fn counters_start_at_zero() {
        let (alice, bob) = establish_pair(false);
        assert_eq!(alice.send_counter, 0);
        assert_eq!(alice.receive_counter, 0);
        assert_eq!(bob.send_counter, 0);
        assert_eq!(bob.receive_counter, 0);
    }

    #[test]
    fn tampered_bundle_is_rejected() {
        let peers = Peers::generate();
        let other = Peers::generate();

        let mut bundle = peers.bob_bundle(false);
        bundle.signed_prekey = *other.bob_spk.public();

        let err = initiate(&peers.alice, &bundle).err().unwrap();
        assert!(matches!(err, SessionError::Establishment { .. }));
    }

    #[test]
    fn responder_rejects_unknown_signed_prekey_id() {
        let peers = Peers::generate();
        let alice_session = initiate(&peers.alice, &peers.bob_bundle(false)).unwrap();
        let ephemeral = PublicKey::from(alice_session.local_ephemeral_public.unwrap());

        let err = respond(&peers.bob, &peers.bob_spk, None, peers.alice.public(), &ephemeral, 99)
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Establishment { .. }));
    }

    #[test]
    fn mismatched_prekey_participation_diverges() {
        let peers = Peers::generate();
        let alice_session = initiate(&peers.alice, &peers.bob_bundle(true)).unwrap();
        let ephemeral = PublicKey::from(alice_session.local_ephemeral_public.unwrap());

        // Bob omits the one-time prekey Alice folded in.
        let bob_session =
            respond(&peers.bob, &peers.bob_spk, None, peers.alice.public(), &ephemeral, 1)
                .unwrap();
        assert_ne!(alice_session.root_key, bob_session.root_key);
    }
}
