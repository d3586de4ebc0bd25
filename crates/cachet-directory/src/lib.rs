//! Key Directory
//!
//! The key-directory collaborator for the Cachet encryption engine: stores
//! each user's published key bundle, holds their pool of one-time prekeys,
//! and hands out prekeys through an atomic claim-and-mark-used operation so
//! that no prekey is ever claimed twice, even under concurrent claimants.
//!
//! The directory only ever sees public key material (and, when a deployment
//! explicitly opts in, encrypted session snapshots for cross-device
//! continuity). Message plaintext and secret keys never reach it.
//!
//! # Components
//!
//! - [`KeyDirectory`]: the async trait the session engine consumes
//! - [`MemoryDirectory`]: in-memory implementation for tests and
//!   single-process deployments
//! - [`UserKeyBundleRecord`] / [`UserPreKeyRecord`]: the wire records,
//!   binary fields as base64

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod directory;
mod error;
mod memory;
mod types;

pub use directory::{ClaimedPreKey, KeyDirectory};
pub use error::DirectoryError;
pub use memory::MemoryDirectory;
pub use types::{SnapshotKey, UserKeyBundleRecord, UserPreKeyRecord};
