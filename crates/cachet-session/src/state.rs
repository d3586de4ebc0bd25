//! Session identity, ratchet state snapshots and the lifecycle state machine.

use cachet_crypto::{ChainKey, CryptoError, MessageKey, advance, advance_to};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Identifies one session: a (local user, peer user, conversation) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Local user owning the session.
    pub local_user: String,
    /// Peer on the other end.
    pub peer_user: String,
    /// Conversation the session encrypts.
    pub conversation: String,
}

impl SessionKey {
    /// Build a session key.
    pub fn new(
        local_user: impl Into<String>,
        peer_user: impl Into<String>,
        conversation: impl Into<String>,
    ) -> Self {
        Self {
            local_user: local_user.into(),
            peer_user: peer_user.into(),
            conversation: conversation.into(),
        }
    }

    /// Storage key under the sessions namespace.
    pub fn storage_key(&self) -> String {
        format!("{}:{}:{}", self.local_user, self.peer_user, self.conversation)
    }
}

/// One immutable snapshot of a session's ratchet state.
///
/// Ratchet operations never mutate a snapshot; they return the successor
/// snapshot alongside the derived message key. The engine persists the
/// successor before releasing the session lock, so a crash or a concurrent
/// reader can only ever observe a complete state.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionState {
    /// Root key from the initial agreement, kept for diagnostics and repair.
    pub root_key: [u8; 32],
    /// Chain advancing once per sent message.
    #[zeroize(skip)]
    pub sending_chain: ChainKey,
    /// Chain advancing once per received message.
    #[zeroize(skip)]
    pub receiving_chain: ChainKey,
    /// Counter of the next message we will send.
    #[zeroize(skip)]
    pub send_counter: u64,
    /// Counter of the next message we expect to receive.
    #[zeroize(skip)]
    pub receive_counter: u64,
    /// Peer's long-term identity key.
    #[zeroize(skip)]
    pub peer_identity: [u8; 32],
    /// Signed prekey the handshake used (the responder's).
    #[zeroize(skip)]
    pub peer_signed_prekey: [u8; 32],
    /// Identifier of that signed prekey.
    #[zeroize(skip)]
    pub peer_signed_prekey_id: u32,
    /// Initiator's ephemeral key, recorded on the responder side so repeated
    /// deliveries of the first envelope do not re-run establishment.
    #[zeroize(skip)]
    pub peer_ephemeral: Option<[u8; 32]>,
    /// Our own ephemeral public, attached to outgoing envelopes while the
    /// peer may not have processed our first message yet.
    #[zeroize(skip)]
    pub local_ephemeral_public: Option<[u8; 32]>,
    /// Whether outgoing envelopes still carry establishment material.
    #[zeroize(skip)]
    pub pending_ephemeral: bool,
    /// One-time prekey id we claimed from the peer's pool, if any.
    #[zeroize(skip)]
    pub claimed_prekey_id: Option<u32>,
}

impl SessionState {
    /// Advance the sending chain by one message.
    ///
    /// Returns the successor snapshot and the message key for the current
    /// send counter.
    pub fn next_send(&self) -> Result<(Self, MessageKey), CryptoError> {
        let (chain, key) = advance(&self.sending_chain, self.send_counter)?;
        let mut next = self.clone();
        next.sending_chain = chain;
        next.send_counter = self.send_counter + 1;
        Ok((next, key))
    }

    /// Advance the receiving chain to `target`, skipping lost counters.
    ///
    /// Returns the successor snapshot positioned just past `target` and the
    /// message key for `target`. A stale or excessively distant target is
    /// rejected without producing a successor.
    pub fn next_receive(&self, target: u64) -> Result<(Self, MessageKey), CryptoError> {
        let (chain, key) = advance_to(&self.receiving_chain, self.receive_counter, target)?;
        let mut next = self.clone();
        next.receiving_chain = chain;
        next.receive_counter = target + 1;
        Ok((next, key))
    }
}

/// Lifecycle of a session as the engine sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session exists for this peer and conversation.
    NoSession,
    /// Establishment is in flight.
    Establishing,
    /// A session exists and both chains are usable.
    Ready,
    /// Decryption evidence shows the chains have diverged; only repair
    /// recovers.
    Mismatched,
    /// A repair is tearing down and re-establishing the session.
    Repairing,
}

impl SessionStatus {
    /// Whether the lifecycle permits moving to `next`.
    ///
    /// Divergence can surface at any point after establishment, and a repair
    /// can be requested from any live state. Everything else follows the
    /// establish / use / repair cycle.
    pub fn can_transition(self, next: SessionStatus) -> bool {
        use SessionStatus::{Establishing, Mismatched, NoSession, Ready, Repairing};
        match (self, next) {
            (NoSession, Establishing) => true,
            // A session message arriving with no session on file is itself
            // divergence evidence.
            (NoSession, Mismatched) => true,
            (Establishing, Ready | NoSession) => true,
            (Ready, Mismatched | NoSession) => true,
            (Mismatched, Repairing | NoSession) => true,
            (Ready | Establishing, Repairing) => true,
            (Repairing, Ready | NoSession | Establishing) => true,
            // A peer's repair envelope restarts establishment in place.
            (Ready | Mismatched, Establishing) => true,
            (Ready, Ready) => true,
            _ => false,
        }
    }
}
