//! The engine: the single entry surface the application talks to.
//!
//! Composes key management, establishment, the ratchet and persistence
//! behind five operations: initialize, ensure-session, encrypt, decrypt
//! and repair. Per-session async locks serialize ratchet steps so each
//! counter is used exactly once; directory calls are bounded by the
//! configured timeout and a timeout is handled like any other failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cachet_crypto::{NONCE_SIZE, PublicKey, Role, decrypt, encrypt};
use cachet_directory::KeyDirectory;
use tracing::debug;

use crate::bundle::BundleFetcher;
use crate::envelope::{ENVELOPE_VERSION, EncryptedEnvelope};
use crate::error::SessionError;
use crate::establish::{initiate, respond};
use crate::events::{EventSink, SessionEvent};
use crate::keypair_store::KeyPairStore;
use crate::local_store::LocalStore;
use crate::safety_number::SafetyNumberService;
use crate::session_store::SessionStore;
use crate::state::{SessionKey, SessionState, SessionStatus};

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size the one-time prekey pool is topped up to.
    pub prekey_target: usize,
    /// Upper bound on any single directory interaction.
    pub directory_timeout: Duration,
    /// Mirror serialized session snapshots to the directory. Off by
    /// default; enabling it trades off-device exposure of ratchet state
    /// for cross-device continuity.
    pub mirror_secrets: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prekey_target: 20,
            directory_timeout: Duration::from_secs(10),
            mirror_secrets: false,
        }
    }
}

/// End-to-end encryption engine for one local user.
pub struct Engine {
    user_id: String,
    keys: KeyPairStore,
    bundles: BundleFetcher,
    sessions: SessionStore,
    safety: SafetyNumberService,
    sink: Arc<dyn EventSink>,
    config: EngineConfig,
    locks: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
    statuses: Mutex<HashMap<SessionKey, SessionStatus>>,
}

impl Engine {
    /// Build an engine over the given storage backends.
    pub fn new(
        user_id: impl Into<String>,
        local: Arc<dyn LocalStore>,
        directory: Arc<dyn KeyDirectory>,
        config: EngineConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            keys: KeyPairStore::new(local.clone(), directory.clone()),
            bundles: BundleFetcher::new(directory.clone()),
            sessions: SessionStore::new(
                local,
                directory.clone(),
                config.mirror_secrets,
                sink.clone(),
            ),
            safety: SafetyNumberService::new(directory),
            sink,
            config,
            locks: Mutex::new(HashMap::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    /// Ensure local keys exist, are published, and the one-time prekey pool
    /// is full. Idempotent; call on every startup.
    pub async fn initialize(&self) -> Result<(), SessionError> {
        self.with_timeout("key initialization", self.keys.ensure_local_keys(&self.user_id))
            .await?;
        self.sink.emit(SessionEvent::KeysPublished { user_id: self.user_id.clone() });

        let added = self
            .with_timeout(
                "prekey replenishment",
                self.keys.replenish_one_time_prekeys(&self.user_id, self.config.prekey_target),
            )
            .await?;
        if added > 0 {
            self.sink.emit(SessionEvent::PreKeysReplenished {
                user_id: self.user_id.clone(),
                added,
            });
        }
        Ok(())
    }

    /// Ensure a ready session with `peer` for `conversation`, establishing
    /// one as initiator if none exists.
    pub async fn ensure_session(&self, peer: &str, conversation: &str) -> Result<(), SessionError> {
        let key = self.session_key(peer, conversation);
        let lock = self.session_lock(&key)?;
        let _guard = lock.lock().await;

        if self.sessions.load(&key).await?.is_some() {
            return Ok(());
        }
        self.establish_as_initiator(&key).await.map(|_| ())
    }

    /// Encrypt one message for `peer`, establishing a session on demand.
    ///
    /// The returned envelope carries establishment material until a message
    /// from the peer proves the session is mutual.
    pub async fn encrypt_message(
        &self,
        peer: &str,
        conversation: &str,
        plaintext: &[u8],
    ) -> Result<EncryptedEnvelope, SessionError> {
        let key = self.session_key(peer, conversation);
        let lock = self.session_lock(&key)?;
        let _guard = lock.lock().await;

        let state = match self.sessions.load(&key).await? {
            Some(state) => state,
            None => self.establish_as_initiator(&key).await?,
        };

        let (next, message_key) = state.next_send().map_err(|e| SessionError::Encryption {
            reason: e.to_string(),
        })?;

        let nonce: [u8; NONCE_SIZE] = rand::random();
        let ciphertext = encrypt(plaintext, message_key.key(), &nonce);

        let envelope = EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            ciphertext,
            nonce: nonce.to_vec(),
            ephemeral_key: if next.pending_ephemeral {
                next.local_ephemeral_public.map(|pk| pk.to_vec())
            } else {
                None
            },
            prekey_id: if next.pending_ephemeral { next.claimed_prekey_id } else { None },
            signed_prekey_id: next.peer_signed_prekey_id,
            message_number: message_key.counter(),
        };

        // Persisting the advanced chain before returning makes counter reuse
        // impossible even across a crash.
        self.sessions.save(&key, &next).await?;
        self.sink.emit(SessionEvent::MessageEncrypted {
            peer_id: peer.to_string(),
            message_number: envelope.message_number,
        });
        Ok(envelope)
    }

    /// Decrypt one envelope from `peer`.
    ///
    /// Establishes the responder side when the envelope carries fresh
    /// establishment material. Out-of-order envelopes within the skip
    /// window decrypt fine; a stale counter is rejected without touching
    /// session state; divergence evidence marks the session mismatched.
    pub async fn decrypt_message(
        &self,
        peer: &str,
        conversation: &str,
        envelope: &EncryptedEnvelope,
    ) -> Result<Vec<u8>, SessionError> {
        if let Err(e) = envelope.check_version() {
            self.sink.emit(SessionEvent::LegacyMessageRejected {
                peer_id: peer.to_string(),
                version: envelope.version,
            });
            return Err(e);
        }

        let key = self.session_key(peer, conversation);
        let lock = self.session_lock(&key)?;
        let _guard = lock.lock().await;

        let existing = self.sessions.load(&key).await?;
        let state = match (&existing, &envelope.ephemeral_key) {
            // Fresh establishment material we have not processed yet.
            (None, Some(ephemeral)) => {
                self.establish_as_responder(&key, envelope, ephemeral).await?
            }
            (Some(session), Some(ephemeral))
                if session.peer_ephemeral.as_ref().map(<[u8; 32]>::as_slice)
                    != Some(ephemeral.as_slice()) =>
            {
                self.establish_as_responder(&key, envelope, ephemeral).await?
            }
            (Some(session), _) => session.clone(),
            (None, None) => {
                // The peer believes a session exists; we have nothing.
                self.record_status(&key, SessionStatus::Mismatched);
                let reason = "peer sent a session message but no session exists".to_string();
                self.sink.emit(SessionEvent::SessionMismatched {
                    peer_id: peer.to_string(),
                    reason: reason.clone(),
                });
                return Err(SessionError::SessionMismatch { reason });
            }
        };

        let nonce: [u8; NONCE_SIZE] =
            envelope.nonce.as_slice().try_into().map_err(|_| SessionError::Decryption {
                reason: format!("nonce has {} bytes, expected {NONCE_SIZE}", envelope.nonce.len()),
            })?;

        let previous_counter = state.receive_counter;
        let (next, message_key) = match state.next_receive(envelope.message_number) {
            Ok(step) => step,
            Err(e) if e.indicates_divergence() => {
                return Err(self.mark_mismatched(&key, peer, e.to_string()));
            }
            // Duplicate or badly delayed delivery. The chain never rewinds;
            // the message is reported undecryptable and state is intact.
            Err(e) => return Err(SessionError::Decryption { reason: e.to_string() }),
        };

        let plaintext = match decrypt(&envelope.ciphertext, &nonce, message_key.key()) {
            Ok(plaintext) => plaintext,
            Err(e) => return Err(self.mark_mismatched(&key, peer, e.to_string())),
        };

        // A decryptable message proves the peer holds the session, so stop
        // attaching establishment material to our own envelopes.
        let mut next = next;
        if next.pending_ephemeral {
            next.pending_ephemeral = false;
            next.local_ephemeral_public = None;
            next.claimed_prekey_id = None;
        }
        self.sessions.save(&key, &next).await?;
        self.record_status(&key, SessionStatus::Ready);

        if envelope.message_number > previous_counter {
            self.sink.emit(SessionEvent::MessagesSkipped {
                peer_id: peer.to_string(),
                from: previous_counter,
                to: envelope.message_number,
            });
        }
        self.sink.emit(SessionEvent::MessageDecrypted {
            peer_id: peer.to_string(),
            message_number: envelope.message_number,
        });
        Ok(plaintext)
    }

    /// Tear down the session with `peer` and re-establish it as initiator.
    ///
    /// Messages encrypted under the old session are permanently lost; the
    /// next envelope we send carries fresh establishment material the peer
    /// uses to converge on the new session.
    pub async fn repair_session(&self, peer: &str, conversation: &str) -> Result<(), SessionError> {
        let key = self.session_key(peer, conversation);
        let lock = self.session_lock(&key)?;
        let _guard = lock.lock().await;

        self.record_status(&key, SessionStatus::Repairing);
        self.sessions.clear(&key).await?;

        match self.establish_as_initiator(&key).await {
            Ok(_) => {
                self.sink.emit(SessionEvent::SessionRepaired { peer_id: peer.to_string() });
                Ok(())
            }
            Err(e) => {
                self.record_status(&key, SessionStatus::NoSession);
                Err(e)
            }
        }
    }

    /// Current lifecycle status of the session with `peer`.
    pub async fn session_status(
        &self,
        peer: &str,
        conversation: &str,
    ) -> Result<SessionStatus, SessionError> {
        let key = self.session_key(peer, conversation);
        if let Some(status) = self.status_of(&key) {
            return Ok(status);
        }
        Ok(if self.sessions.load(&key).await?.is_some() {
            SessionStatus::Ready
        } else {
            SessionStatus::NoSession
        })
    }

    /// Safety number for out-of-band verification with `peer`.
    pub async fn safety_number(&self, peer: &str) -> Result<String, SessionError> {
        self.with_timeout("safety number lookup", self.safety.safety_number(&self.user_id, peer))
            .await
    }

    async fn establish_as_initiator(&self, key: &SessionKey) -> Result<SessionState, SessionError> {
        self.record_status(key, SessionStatus::Establishing);

        let result = async {
            let local_keys = self.keys.load_local_keys(&self.user_id).await?;
            let bundle =
                self.with_timeout("bundle fetch", self.bundles.fetch(&key.peer_user)).await?;

            if bundle.one_time_prekey.is_none() {
                self.sink.emit(SessionEvent::PreKeyExhausted { peer_id: key.peer_user.clone() });
            }

            let used_one_time_prekey = bundle.one_time_prekey.is_some();
            let state = initiate(&local_keys.identity, &bundle)?;
            self.sessions.save(key, &state).await?;

            self.sink.emit(SessionEvent::SessionEstablished {
                peer_id: key.peer_user.clone(),
                role: Role::Initiator,
                used_one_time_prekey,
            });
            Ok(state)
        }
        .await;

        match result {
            Ok(state) => {
                self.record_status(key, SessionStatus::Ready);
                Ok(state)
            }
            Err(e) => {
                self.record_status(key, SessionStatus::NoSession);
                Err(e)
            }
        }
    }

    async fn establish_as_responder(
        &self,
        key: &SessionKey,
        envelope: &EncryptedEnvelope,
        ephemeral: &[u8],
    ) -> Result<SessionState, SessionError> {
        self.record_status(key, SessionStatus::Establishing);

        let result = async {
            let local_keys = self.keys.load_local_keys(&self.user_id).await?;

            let ephemeral: [u8; 32] =
                ephemeral.try_into().map_err(|_| SessionError::Establishment {
                    reason: format!("ephemeral key has {} bytes, expected 32", ephemeral.len()),
                })?;

            let peer_identity = self
                .with_timeout("identity lookup", self.bundles.fetch_identity(&key.peer_user))
                .await?;

            let one_time_prekey = match envelope.prekey_id {
                Some(id) => Some(
                    self.keys.take_one_time_prekey(&self.user_id, id).await?.ok_or_else(|| {
                        SessionError::Establishment {
                            reason: format!("one-time prekey {id} is no longer held"),
                        }
                    })?,
                ),
                None => None,
            };

            let used_one_time_prekey = one_time_prekey.is_some();
            let state = respond(
                &local_keys.identity,
                &local_keys.signed_prekey,
                one_time_prekey.as_ref(),
                &peer_identity,
                &PublicKey::from(ephemeral),
                envelope.signed_prekey_id,
            )?;
            self.sessions.save(key, &state).await?;

            self.sink.emit(SessionEvent::SessionEstablished {
                peer_id: key.peer_user.clone(),
                role: Role::Responder,
                used_one_time_prekey,
            });
            Ok(state)
        }
        .await;

        match result {
            Ok(state) => {
                self.record_status(key, SessionStatus::Ready);
                Ok(state)
            }
            Err(e) => {
                self.record_status(key, SessionStatus::NoSession);
                Err(e)
            }
        }
    }

    fn mark_mismatched(&self, key: &SessionKey, peer: &str, reason: String) -> SessionError {
        debug!(peer, %reason, "session mismatch detected");
        self.record_status(key, SessionStatus::Mismatched);
        self.sink.emit(SessionEvent::SessionMismatched {
            peer_id: peer.to_string(),
            reason: reason.clone(),
        });
        SessionError::SessionMismatch { reason }
    }

    fn session_key(&self, peer: &str, conversation: &str) -> SessionKey {
        SessionKey::new(self.user_id.clone(), peer, conversation)
    }

    fn session_lock(&self, key: &SessionKey) -> Result<Arc<tokio::sync::Mutex<()>>, SessionError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| SessionError::Storage { reason: "lock table poisoned".to_string() })?;
        Ok(locks.entry(key.clone()).or_default().clone())
    }

    fn status_of(&self, key: &SessionKey) -> Option<SessionStatus> {
        self.statuses.lock().ok().and_then(|statuses| statuses.get(key).copied())
    }

    fn record_status(&self, key: &SessionKey, next: SessionStatus) {
        if let Ok(mut statuses) = self.statuses.lock() {
            let current = statuses.get(key).copied().unwrap_or(SessionStatus::NoSession);
            if !current.can_transition(next) {
                debug!(?current, ?next, "unexpected session status transition");
            }
            statuses.insert(key.clone(), next);
        }
    }

    async fn with_timeout<T, F>(&self, operation: &'static str, fut: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        tokio::time::timeout(self.config.directory_timeout, fut)
            .await
            .map_err(|_| SessionError::Timeout { operation })?
    }
}
