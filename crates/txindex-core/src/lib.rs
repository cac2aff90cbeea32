//! txindex-core: address → transaction index kept in step with a node.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → SyncDriver
//!                      ├── poll_head        (chain tip, launches backward walks)
//!                      ├── TaskQueue        (block fetches, retry ceiling)
//!                      ├── AddressIndex     (entries, transactions, spent marks, pruning)
//!                      ├── PersistQueue     (sharded bounded store writers)
//!                      └── KvStore backend  (memory / SQLite)
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod index;
pub mod notify;
pub mod persist;
pub mod query;
pub mod queue;
pub mod source;
pub mod store;
pub mod sync;
pub mod types;

pub use builder::IndexerBuilder;
pub use config::{IndexerConfig, SyncState};
pub use error::IndexerError;
pub use index::{AddressIndex, BlockApplied, PrunePlan};
pub use notify::{NoopPublisher, Publisher};
pub use persist::{HealthStatus, PersistQueue, PersistStats};
pub use query::{SortOrder, TxFilter, TxPage, TxQuery};
pub use queue::{FetchTask, RetryDecision, TaskQueue};
pub use source::ChainSource;
pub use store::{load_index, KvPair, KvStore, LoadStats, MemoryKvStore, StoreKey, StoreOp};
pub use sync::{PollOutcome, PruneStats, SyncDriver, SyncHandle, SyncStatus, TaskOutcome};
pub use types::{AddressIndexEntry, Block, ChainInfo, OutPoint, Transaction};
