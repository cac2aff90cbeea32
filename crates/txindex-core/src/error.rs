//! Error types for the sync and indexing pipeline.

use thiserror::Error;

/// Errors that can occur while syncing, indexing or persisting.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Invalid block {hash}: {reason}")]
    InvalidBlock { hash: String, reason: String },

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shutting down")]
    Shutdown,

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for failures that the owning loop retries by requeueing.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Rpc(_) | Self::Timeout { .. } | Self::InvalidBlock { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(IndexerError::Rpc("refused".into()).is_transient());
        assert!(IndexerError::Timeout { ms: 30_000 }.is_transient());
        assert!(IndexerError::InvalidBlock {
            hash: "00ab".into(),
            reason: "zero height".into()
        }
        .is_transient());
        assert!(!IndexerError::Storage("disk full".into()).is_transient());
        assert!(!IndexerError::Shutdown.is_transient());
    }
}
