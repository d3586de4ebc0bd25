//! Directory record types.
//!
//! The logical schema of the key directory: one [`UserKeyBundleRecord`] per
//! user (upserted on publish) and many [`UserPreKeyRecord`] rows per user.
//! Binary fields serialize as base64 strings.

use serde::{Deserialize, Serialize};

/// A user's published key bundle row. One per user, upserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserKeyBundleRecord {
    /// User this bundle belongs to.
    pub user_id: String,
    /// Long-term identity public key.
    #[serde(with = "b64")]
    pub identity_key: Vec<u8>,
    /// Current signed prekey public key.
    #[serde(with = "b64")]
    pub signed_prekey: Vec<u8>,
    /// Signature binding the signed prekey to the identity key.
    #[serde(with = "b64")]
    pub signed_prekey_signature: Vec<u8>,
    /// Identifier of the signed prekey.
    pub signed_prekey_id: u32,
}

/// A single one-time prekey row. Many per user; `used` flips exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPreKeyRecord {
    /// User this prekey belongs to.
    pub user_id: String,
    /// Identifier of the prekey.
    pub prekey_id: u32,
    /// Prekey public key.
    #[serde(with = "b64")]
    pub prekey: Vec<u8>,
    /// Whether this prekey has been claimed.
    pub used: bool,
}

/// Addressing for mirrored session snapshots: one snapshot per
/// (local user, peer, conversation) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    /// Local user the snapshot belongs to.
    pub user_id: String,
    /// Peer of the session.
    pub peer_id: String,
    /// Conversation identifier.
    pub conversation_id: String,
}

/// Serde for binary fields as base64 strings.
mod b64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_record_uses_base64_for_binary_fields() {
        let record = UserKeyBundleRecord {
            user_id: "alice".to_string(),
            identity_key: vec![1, 2, 3],
            signed_prekey: vec![4, 5, 6],
            signed_prekey_signature: vec![7, 8, 9],
            signed_prekey_id: 1,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["identity_key"], "AQID");
        assert_eq!(json["signed_prekey_id"], 1);

        let restored: UserKeyBundleRecord = serde_json::from_value(json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn prekey_record_roundtrips() {
        let record = UserPreKeyRecord {
            user_id: "bob".to_string(),
            prekey_id: 42,
            prekey: vec![0xAA; 32],
            used: false,
        };

        let json = serde_json::to_string(&record).unwrap();
        let restored: UserPreKeyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let json = r#"{"user_id":"x","prekey_id":1,"prekey":"not base64!!","used":false}"#;
        let result: Result<UserPreKeyRecord, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
