//! The wire format exchanged through the transport.
//!
//! Envelopes are the only message-related data the server ever sees:
//! ciphertext, nonce, counters and the public establishment material.
//! Binary fields travel base64-encoded inside JSON.

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u8 = 1;

/// One encrypted message as carried by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Format version; anything other than [`ENVELOPE_VERSION`] is rejected.
    pub version: u8,
    /// AEAD ciphertext including the authentication tag.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
    /// Random 24-byte AEAD nonce.
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Sender's ephemeral public key, present while the sender cannot yet
    /// know the receiver has established the session.
    #[serde(with = "b64_opt")]
    pub ephemeral_key: Option<Vec<u8>>,
    /// One-time prekey id the sender claimed, if any.
    pub prekey_id: Option<u32>,
    /// Signed prekey id the sender's agreement used.
    pub signed_prekey_id: u32,
    /// Position of this message in the sender's chain.
    pub message_number: u64,
}

impl EncryptedEnvelope {
    /// Reject envelopes from an incompatible format version.
    pub fn check_version(&self) -> Result<(), SessionError> {
        if self.version != ENVELOPE_VERSION {
            return Err(SessionError::Decryption {
                reason: format!("unsupported envelope version {}", self.version),
            });
        }
        Ok(())
    }
}

mod b64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        bytes.as_ref().map(|b| STANDARD.encode(b)).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let text: Option<String> = Option::deserialize(d)?;
        text.map(|t| STANDARD.decode(t).map_err(serde::de::Error::custom)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> EncryptedEnvelope {
        EncryptedEnvelope {
            version: ENVELOPE_VERSION,
            ciphertext: vec![1, 2, 3],
            nonce: vec![0; 24],
            ephemeral_key: Some(vec![9; 32]),
            prekey_id: Some(4),
            signed_prekey_id: 1,
            message_number: 0,
        }
    }

    #[test]
    fn roundtrips_through_json_with_base64_fields() {
        let env = envelope();
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("AQID"), "ciphertext must be base64 in transit: {json}");

        let restored: EncryptedEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, env);
    }

    #[test]
    fn absent_ephemeral_serializes_as_null() {
        let mut env = envelope();
        env.ephemeral_key = None;
        env.prekey_id = None;

        let json = serde_json::to_string(&env).unwrap();
        let restored: EncryptedEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.ephemeral_key, None);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut env = envelope();
        env.version = 0;
        assert!(matches!(env.check_version(), Err(SessionError::Decryption { .. })));

        env.version = 2;
        assert!(env.check_version().is_err());
    }

    #[test]
    fn current_version_passes() {
        assert!(envelope().check_version().is_ok());
    }
}
