//! Indexer configuration and sync state types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Base URL of the node's REST interface.
    pub node_url: String,
    /// Number of trailing blocks for which address activity is retained.
    /// Fixed for the lifetime of the process.
    pub prune_window: u64,
    /// Chain-head poll interval (milliseconds).
    pub poll_interval_ms: u64,
    /// Fetch-queue worker interval (milliseconds).
    pub fetch_interval_ms: u64,
    /// Timeout attached to every remote call (milliseconds).
    pub request_timeout_ms: u64,
    /// A fetch task is dropped once its error count exceeds this.
    pub max_task_retries: u32,
    /// Transactions per query page.
    pub page_size: usize,
    /// Number of persistence workers.
    pub persist_workers: usize,
    /// Depth of the persistence queue before writers are made to wait.
    pub persist_queue_capacity: usize,
    /// Evictions applied per write-lock acquisition during pruning.
    pub prune_chunk_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            node_url: "http://127.0.0.1:8332".into(),
            prune_window: 6,
            poll_interval_ms: 10_000,
            fetch_interval_ms: 3_000,
            request_timeout_ms: 30_000,
            max_task_retries: 8,
            page_size: 150,
            persist_workers: 4,
            persist_queue_capacity: 1_024,
            prune_chunk_size: 512,
        }
    }
}

impl IndexerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject settings the sync driver cannot run with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.prune_window == 0 {
            return Err(IndexerError::Config("prune_window must be > 0".into()));
        }
        if self.page_size == 0 {
            return Err(IndexerError::Config("page_size must be > 0".into()));
        }
        if self.persist_workers == 0 {
            return Err(IndexerError::Config("persist_workers must be > 0".into()));
        }
        if self.persist_queue_capacity == 0 {
            return Err(IndexerError::Config(
                "persist_queue_capacity must be > 0".into(),
            ));
        }
        if self.prune_chunk_size == 0 {
            return Err(IndexerError::Config("prune_chunk_size must be > 0".into()));
        }
        Ok(())
    }
}

/// Process-wide sync progress. Written only by the sync driver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Height up to which the index is known to be contiguous.
    pub local_height: u64,
    /// Chain height observed when the current walk was launched.
    pub best_known_height: u64,
    /// A backward walk is in flight; the poller must not launch another.
    pub in_sync_pass: bool,
    /// Best hash the poller launched a walk for.
    pub last_seen_hash: Option<String>,
    /// Set by the first successful chain-info poll.
    pub bootstrapped: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = IndexerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_task_retries, 8);
        assert_eq!(cfg.page_size, 150);
    }

    #[test]
    fn zero_window_rejected() {
        let cfg = IndexerConfig {
            prune_window: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(IndexerError::Config(_))));
    }

    #[test]
    fn partial_yaml_like_json_uses_defaults() {
        let cfg: IndexerConfig =
            serde_json::from_value(serde_json::json!({ "prune_window": 12 })).unwrap();
        assert_eq!(cfg.prune_window, 12);
        assert_eq!(cfg.poll_interval_ms, 10_000);
    }
}
