//! Error types for the model artifact cache

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the model artifact cache
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key cannot be used as a cache filename
    #[error("Invalid cache key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    // =========================================================================
    // Disk Tier Errors
    // =========================================================================
    /// A single object is larger than the shard that has to hold it
    #[error("Object {key} ({size} bytes) exceeds shard capacity of {capacity} bytes")]
    CapacityOverflow { key: String, size: u64, capacity: u64 },

    /// Advisory lock could not be acquired in time
    #[error("Timed out after {timeout:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, timeout: Duration },

    /// Index file could not be encoded or decoded
    #[error("Index serialization failed for {}: {source}", path.display())]
    IndexCodec {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // =========================================================================
    // Remote Tier Errors
    // =========================================================================
    /// Object does not exist in the remote store
    #[error("Object not found in remote store: {0}")]
    RemoteNotFound(String),

    /// Remote store rejected or failed an operation
    #[error("Remote {operation} failed for {key}: {reason}")]
    Remote {
        operation: &'static str,
        key: String,
        reason: String,
    },

    /// Remote transport error
    #[error("Remote transport error: {0}")]
    RemoteTransport(#[source] reqwest::Error),

    // =========================================================================
    // Memory Tier Errors
    // =========================================================================
    /// Loader callback failed to materialize an artifact
    #[error("Failed to load {key}: {reason}")]
    Load { key: String, reason: String },

    /// Artifact could not be found in any tier
    #[error("Artifact not found in any tier: {0}")]
    NotFound(String),
}

impl Error {
    /// Whether the error is a remote-tier failure (recoverable by policy)
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::RemoteNotFound(_) | Error::Remote { .. } | Error::RemoteTransport(_)
        )
    }
}
