//! The remote chain source the sync driver pulls from.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::types::{Block, ChainInfo};

/// Read access to a full node's chain data.
///
/// Implementations fail on network or decode errors; retrying is the
/// caller's job.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current chain tip (`/rest/chaininfo.json`).
    async fn chain_info(&self) -> Result<ChainInfo, IndexerError>;

    /// A full block with its transactions (`/rest/block/<hash>.json`).
    async fn block(&self, hash: &str) -> Result<Block, IndexerError>;
}
