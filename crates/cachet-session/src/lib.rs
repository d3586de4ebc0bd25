//! Cachet Session Engine
//!
//! End-to-end encryption for one-to-one chat: key lifecycle management,
//! X3DH-style session establishment, a single-chain symmetric ratchet and
//! AEAD message encryption, composed behind the [`Engine`] entry surface.
//! Message plaintext never reaches the server; the engine only exchanges
//! opaque [`EncryptedEnvelope`]s with the transport and public key material
//! with the key directory.
//!
//! # Architecture
//!
//! Dependencies point one way: key management ([`KeyPairStore`]) knows
//! nothing about sessions; session establishment and the ratchet consume
//! key material; the [`Engine`] composes both. Every ratchet or
//! establishment step produces a new immutable [`SessionState`] snapshot
//! which is persisted before the operation returns, so concurrent callers
//! can never observe a half-mutated session.
//!
//! # Components
//!
//! - [`Engine`]: initialize, ensure-session, encrypt, decrypt, repair,
//!   safety-number
//! - [`KeyPairStore`]: identity / signed-prekey / one-time-prekey lifecycle
//! - [`SessionStore`]: session persistence plus optional directory mirror
//! - [`SafetyNumberService`]: order-independent verification fingerprints
//! - [`EventSink`]: injected observability; tests assert on emitted
//!   [`SessionEvent`]s instead of capturing process-wide logs

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod bundle;
mod engine;
mod envelope;
mod error;
mod establish;
mod events;
mod keypair_store;
mod local_store;
mod safety_number;
mod session_store;
mod state;

pub use bundle::BundleFetcher;
pub use engine::{Engine, EngineConfig};
pub use envelope::{ENVELOPE_VERSION, EncryptedEnvelope};
pub use error::SessionError;
pub use establish::{initiate, respond};
pub use events::{EventSink, RecordingSink, SessionEvent, TracingSink};
pub use keypair_store::{KeyPairStore, LocalKeys};
pub use local_store::{LocalStore, MemoryLocalStore};
pub use safety_number::SafetyNumberService;
pub use session_store::SessionStore;
pub use state::{SessionKey, SessionState, SessionStatus};
