//! Injected observability sink.
//!
//! The engine emits [`SessionEvent`]s through an [`EventSink`] supplied at
//! construction instead of logging to a process-wide subscriber. Tests
//! assert on a [`RecordingSink`]; production wires up [`TracingSink`].

use std::sync::Mutex;

use cachet_crypto::Role;
use tracing::{info, warn};

/// Notable engine transitions, emitted through the injected sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Local keys exist and their public halves were published.
    KeysPublished {
        /// The local user
        user_id: String,
    },
    /// One-time prekeys were topped up at the directory.
    PreKeysReplenished {
        /// The local user
        user_id: String,
        /// How many new prekeys were uploaded
        added: usize,
    },
    /// A session reached `Ready` through establishment.
    SessionEstablished {
        /// Peer of the session
        peer_id: String,
        /// Which side of the handshake we were
        role: Role,
        /// Whether a one-time prekey strengthened the handshake
        used_one_time_prekey: bool,
    },
    /// The peer's one-time prekey pool was exhausted; the handshake
    /// proceeded with reduced forward secrecy.
    PreKeyExhausted {
        /// Peer whose pool was empty
        peer_id: String,
    },
    /// A message was encrypted and the send chain advanced.
    MessageEncrypted {
        /// Peer of the session
        peer_id: String,
        /// Sequence number of the message
        message_number: u64,
    },
    /// A message was decrypted and the receive chain advanced.
    MessageDecrypted {
        /// Peer of the session
        peer_id: String,
        /// Sequence number of the message
        message_number: u64,
    },
    /// The receive chain skipped ahead over undelivered counters.
    MessagesSkipped {
        /// Peer of the session
        peer_id: String,
        /// First skipped counter
        from: u64,
        /// Counter the chain advanced to
        to: u64,
    },
    /// Decryption failed in a way that indicates diverged ratchet state.
    SessionMismatched {
        /// Peer of the session
        peer_id: String,
        /// Evidence of the divergence
        reason: String,
    },
    /// A session was destroyed and re-established.
    SessionRepaired {
        /// Peer of the session
        peer_id: String,
    },
    /// The best-effort directory mirror failed; the session stays usable.
    MirrorFailed {
        /// Peer of the session
        peer_id: String,
        /// What the directory reported
        reason: String,
    },
    /// An envelope carried an unknown version tag and was rejected.
    LegacyMessageRejected {
        /// Peer the envelope came from
        peer_id: String,
        /// The unsupported version
        version: u8,
    },
}

/// Destination for engine events. Implementations must be cheap; the
/// engine emits synchronously on its own call path.
pub trait EventSink: Send + Sync {
    /// Deliver one event.
    fn emit(&self, event: SessionEvent);
}

/// Default sink forwarding events to `tracing`.
#[derive(Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: SessionEvent) {
        match &event {
            SessionEvent::SessionMismatched { .. }
            | SessionEvent::MirrorFailed { .. }
            | SessionEvent::PreKeyExhausted { .. }
            | SessionEvent::LegacyMessageRejected { .. } => warn!(?event, "session event"),
            _ => info!(?event, "session event"),
        }
    }
}

/// Sink capturing events in memory for test assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event emitted so far, in order.
    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    /// Whether any recorded event satisfies the predicate.
    pub fn contains(&self, predicate: impl Fn(&SessionEvent) -> bool) -> bool {
        self.events().iter().any(predicate)
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: SessionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
