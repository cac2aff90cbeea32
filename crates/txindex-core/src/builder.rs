//! Fluent builder API for indexer configuration.
//!
//! # Example
//!
//! ```rust
//! use txindex_core::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .node_url("http://127.0.0.1:8332")
//!     .prune_window(12)
//!     .poll_interval_ms(5_000)
//!     .build_config();
//! assert_eq!(config.prune_window, 12);
//! ```

use crate::config::IndexerConfig;

/// Fluent builder for `IndexerConfig`.
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the node's REST base URL.
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.config.node_url = url.into();
        self
    }

    /// Set the pruning window in blocks.
    pub fn prune_window(mut self, blocks: u64) -> Self {
        self.config.prune_window = blocks;
        self
    }

    /// Set the head poll interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Set the fetch worker interval in milliseconds.
    pub fn fetch_interval_ms(mut self, ms: u64) -> Self {
        self.config.fetch_interval_ms = ms;
        self
    }

    /// Set the per-request timeout in milliseconds.
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    /// Set the fetch task retry ceiling.
    pub fn max_task_retries(mut self, n: u32) -> Self {
        self.config.max_task_retries = n;
        self
    }

    /// Set the query page size.
    pub fn page_size(mut self, n: usize) -> Self {
        self.config.page_size = n;
        self
    }

    /// Set the persistence pool size and queue depth.
    pub fn persistence(mut self, workers: usize, capacity: usize) -> Self {
        self.config.persist_workers = workers;
        self.config.persist_queue_capacity = capacity;
        self
    }

    /// Set how many evictions are applied per write-lock acquisition.
    pub fn prune_chunk_size(mut self, n: usize) -> Self {
        self.config.prune_chunk_size = n;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(self) -> IndexerConfig {
        self.config
    }
}
