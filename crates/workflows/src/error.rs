use dht::{DhtError, DhtKey};
use thiserror::Error;

/// Errors raised by workflow steps and builders.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// A required entry is missing from the DHT.
    #[error("Entry not found: {0}")]
    NotFound(DhtKey),

    /// The file cannot be split with the given options.
    #[error("Invalid upload options: {0}")]
    InvalidOptions(String),

    /// The profile kept changing underneath the update.
    #[error("Profile of {owner} changed concurrently {attempts} times")]
    ProfileContention { owner: String, attempts: u32 },

    #[error("DHT error: {0}")]
    Dht(#[from] DhtError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Process error: {0}")]
    Process(#[from] process::ProcessError),
}

/// Result type for workflow operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;
