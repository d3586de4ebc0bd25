//! Error types for directory operations

use thiserror::Error;

/// Errors from key-directory operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory backend could not be reached or failed mid-operation
    #[error("directory unavailable: {reason}")]
    Unavailable {
        /// What the backend reported
        reason: String,
    },

    /// A record could not be encoded or decoded
    #[error("record serialization failed: {reason}")]
    Serialization {
        /// What failed to (de)serialize
        reason: String,
    },
}

impl DirectoryError {
    /// Returns true if retrying the operation may succeed.
    ///
    /// Backend unavailability is transient; serialization failures indicate
    /// corrupt records and are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}
