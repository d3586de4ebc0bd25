//! Session persistence: local always, directory mirror optionally.
//!
//! The local write is the durable one; the directory mirror exists for
//! cross-device continuity and is best effort. Mirroring ratchet secrets
//! off-device widens the attack surface, so it is off unless the engine
//! was configured with it explicitly.

use std::sync::Arc;

use cachet_directory::{KeyDirectory, SnapshotKey};
use tracing::debug;

use crate::error::SessionError;
use crate::events::{EventSink, SessionEvent};
use crate::local_store::{LocalStore, NS_SESSIONS};
use crate::state::{SessionKey, SessionState};

/// Persists [`SessionState`] snapshots.
pub struct SessionStore {
    local: Arc<dyn LocalStore>,
    directory: Arc<dyn KeyDirectory>,
    mirror_secrets: bool,
    sink: Arc<dyn EventSink>,
}

impl SessionStore {
    /// Build a store. `mirror_secrets` enables the best-effort directory
    /// mirror of serialized session snapshots.
    pub fn new(
        local: Arc<dyn LocalStore>,
        directory: Arc<dyn KeyDirectory>,
        mirror_secrets: bool,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self { local, directory, mirror_secrets, sink }
    }

    /// Persist a snapshot locally, then mirror it if enabled.
    ///
    /// A mirror failure emits [`SessionEvent::MirrorFailed`] and is
    /// otherwise swallowed; the local write is the source of truth.
    ///
    /// # Errors
    ///
    /// [`SessionError::Storage`] when the local write fails.
    pub async fn save(&self, key: &SessionKey, state: &SessionState) -> Result<(), SessionError> {
        let json = serde_json::to_string(state)
            .map_err(|e| SessionError::Storage { reason: e.to_string() })?;
        self.local.put(NS_SESSIONS, &key.storage_key(), json.clone()).await?;

        if self.mirror_secrets {
            let result = self
                .directory
                .store_session_snapshot(snapshot_key(key), json.into_bytes())
                .await;
            if let Err(e) = result {
                debug!(peer = %key.peer_user, error = %e, "session mirror failed");
                self.sink.emit(SessionEvent::MirrorFailed {
                    peer_id: key.peer_user.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(())
    }

    /// Load the locally persisted snapshot, if any.
    pub async fn load(&self, key: &SessionKey) -> Result<Option<SessionState>, SessionError> {
        let Some(json) = self.local.get(NS_SESSIONS, &key.storage_key()).await? else {
            return Ok(None);
        };
        let state = serde_json::from_str(&json)
            .map_err(|e| SessionError::Storage { reason: e.to_string() })?;
        Ok(Some(state))
    }

    /// Remove the snapshot locally and, best effort, from the mirror.
    pub async fn clear(&self, key: &SessionKey) -> Result<(), SessionError> {
        self.local.remove(NS_SESSIONS, &key.storage_key()).await?;
        if !self.mirror_secrets {
            return Ok(());
        }
        if let Err(e) = self.directory.clear_session_snapshot(&snapshot_key(key)).await {
            debug!(peer = %key.peer_user, error = %e, "mirror clear failed");
        }
        Ok(())
    }
}

fn snapshot_key(key: &SessionKey) -> SnapshotKey {
    SnapshotKey {
        user_id: key.local_user.clone(),
        peer_id: key.peer_user.clone(),
        conversation_id: key.conversation.clone(),
    }
}
