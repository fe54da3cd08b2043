use thiserror::Error;

use crate::{DhtKey, Version};

/// Errors returned by DHT operations.
#[derive(Debug, Error)]
pub enum DhtError {
    /// The stored version differs from the one the writer based its update on.
    #[error("Version conflict for {key}: expected version {expected}, found {actual}")]
    VersionConflict {
        key: DhtKey,
        expected: Version,
        actual: Version,
    },

    /// The entry is guarded by a different protection key.
    #[error("Protection key mismatch for {0}")]
    ProtectionKeyMismatch(DhtKey),

    /// The network or the responsible peer could not be reached.
    #[error("DHT unavailable: {0}")]
    Unavailable(String),

    /// Content could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;
