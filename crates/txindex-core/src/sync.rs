//! The sync driver: chain-head poller, fetch-queue worker and the
//! backward walk that ties them together.
//!
//! # Walk
//!
//! ```text
//! poll_head ── new best hash ──► queue ──► process_next_task
//!                                  ▲              │ fetch block, apply
//!                                  │              ▼
//!                                  └── previous_hash while local < height
//!                                                 │
//!                          local + 1 == height ───┴─► local = best, prune
//! ```
//!
//! The driver owns the queue, the index and the sync state behind a single
//! `RwLock`. Queries take the read side; nothing holds the lock across a
//! remote call or a store write.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{IndexerConfig, SyncState};
use crate::error::IndexerError;
use crate::index::AddressIndex;
use crate::notify::Publisher;
use crate::persist::{PersistQueue, PersistStats};
use crate::query::{TxPage, TxQuery};
use crate::queue::{FetchTask, RetryDecision, TaskQueue};
use crate::source::ChainSource;
use crate::store::{load_index, KvStore, StoreOp};
use crate::types::Transaction;

/// Result of one head poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// First successful poll: the frontier was placed `prune_window` below
    /// the tip and a walk launched.
    Bootstrapped { local_height: u64, best_height: u64 },
    /// A new tip was seen and a walk launched.
    Enqueued { best_height: u64, hash: String },
    /// Tip unchanged.
    Unchanged,
    /// A walk is already in flight.
    Busy,
}

/// Result of one worker step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Queue empty.
    Idle,
    /// Block fetched and indexed.
    Applied {
        height: u64,
        new_txs: usize,
        reconnected: bool,
    },
    /// Fetch failed; task requeued.
    Requeued { hash: String, error_count: u32 },
    /// Fetch failed past the retry ceiling; task dropped.
    Dropped { hash: String, error_count: u32 },
}

/// Counts from a pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub entries: usize,
    pub txs: usize,
    pub spent: usize,
}

/// Snapshot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub local_height: u64,
    pub best_known_height: u64,
    pub in_sync_pass: bool,
    pub queued_tasks: usize,
    pub dropped_tasks: u64,
    pub addresses: usize,
    pub transactions: usize,
    pub spent_outputs: usize,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub persistence: PersistStats,
}

struct SyncInner {
    state: SyncState,
    queue: TaskQueue,
    index: AddressIndex,
    last_synced_at: Option<DateTime<Utc>>,
}

/// Owns the index and drives it from a `ChainSource`.
pub struct SyncDriver {
    config: IndexerConfig,
    source: Arc<dyn ChainSource>,
    publisher: Arc<dyn Publisher>,
    persist: PersistQueue,
    inner: RwLock<SyncInner>,
    dropped_tasks: AtomicU64,
}

impl SyncDriver {
    /// Reload the index from `store`, then build a driver over it.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(
        config: IndexerConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn KvStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        let (index, _) = load_index(store.as_ref()).await?;
        Ok(Self::with_index(config, source, store, publisher, index))
    }

    /// Build a driver over an already loaded index.
    pub fn with_index(
        config: IndexerConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn KvStore>,
        publisher: Arc<dyn Publisher>,
        index: AddressIndex,
    ) -> Self {
        let persist = PersistQueue::spawn(
            store,
            config.persist_workers,
            config.persist_queue_capacity,
        );
        Self {
            config,
            source,
            publisher,
            persist,
            inner: RwLock::new(SyncInner {
                state: SyncState::default(),
                queue: TaskQueue::new(),
                index,
                last_synced_at: None,
            }),
            dropped_tasks: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    // ─── Poller ───────────────────────────────────────────────────────────

    /// Ask the node for its tip and launch a walk if warranted.
    pub async fn poll_head(&self) -> Result<PollOutcome, IndexerError> {
        let info = self.remote(self.source.chain_info()).await?;
        tracing::debug!(chain = %info.chain, blocks = info.blocks, "polled chain info");

        let mut inner = self.inner.write();
        let SyncInner { state, queue, .. } = &mut *inner;

        if !state.bootstrapped {
            state.bootstrapped = true;
            state.local_height = info.blocks.saturating_sub(self.config.prune_window);
            state.best_known_height = info.blocks;
            state.last_seen_hash = Some(info.best_block_hash.clone());
            state.in_sync_pass = true;
            queue.push(info.best_block_hash);
            tracing::info!(
                local = state.local_height,
                best = info.blocks,
                "bootstrapped sync frontier"
            );
            return Ok(PollOutcome::Bootstrapped {
                local_height: state.local_height,
                best_height: info.blocks,
            });
        }

        if state.in_sync_pass {
            return Ok(PollOutcome::Busy);
        }
        if state.last_seen_hash.as_deref() == Some(info.best_block_hash.as_str()) {
            return Ok(PollOutcome::Unchanged);
        }

        state.best_known_height = info.blocks;
        state.last_seen_hash = Some(info.best_block_hash.clone());
        state.in_sync_pass = true;
        queue.push(info.best_block_hash.clone());
        tracing::info!(height = info.blocks, hash = %info.best_block_hash, "new tip, walk queued");
        Ok(PollOutcome::Enqueued {
            best_height: info.blocks,
            hash: info.best_block_hash,
        })
    }

    // ─── Worker ───────────────────────────────────────────────────────────

    /// Pop one task and fetch, apply and advance the walk.
    pub async fn process_next_task(&self) -> Result<TaskOutcome, IndexerError> {
        let next = self.inner.write().queue.pop();
        let Some(task) = next else {
            return Ok(TaskOutcome::Idle);
        };

        let block = match self.remote(self.source.block(&task.block_hash)).await {
            Ok(block) if block.height == 0 => {
                let err = IndexerError::InvalidBlock {
                    hash: task.block_hash.clone(),
                    reason: "zero height".into(),
                };
                return Ok(self.fail_task(task, &err));
            }
            Ok(block) => block,
            Err(e) => return Ok(self.fail_task(task, &e)),
        };

        let (applied, reconnected, local_height) = {
            let mut inner = self.inner.write();
            let touch_height = inner.state.best_known_height;
            let applied = inner.index.apply_block(&block, touch_height);
            let SyncInner { state, queue, .. } = &mut *inner;

            let reconnected = if state.local_height + 1 == block.height {
                state.local_height = state.best_known_height;
                true
            } else if state.local_height < block.height {
                if block.previous_hash.is_empty() {
                    tracing::warn!(height = block.height, "block has no parent; walk ends");
                    state.in_sync_pass = !queue.is_empty();
                } else {
                    queue.push(block.previous_hash.clone());
                }
                false
            } else {
                // Behind the frontier: a leftover retry or a stale tip.
                if queue.is_empty() {
                    state.in_sync_pass = false;
                }
                false
            };
            (applied, reconnected, state.local_height)
        };

        tracing::info!(
            height = block.height,
            hash = %block.hash,
            new_txs = applied.new_txs,
            "block indexed"
        );

        self.persist_ops(applied.ops).await;
        self.publish(&applied.notifications);

        if reconnected {
            let stats = self.prune().await;
            let mut inner = self.inner.write();
            inner.state.in_sync_pass = false;
            inner.last_synced_at = Some(Utc::now());
            tracing::info!(
                local = local_height,
                pruned_entries = stats.entries,
                pruned_txs = stats.txs,
                "walk reconnected"
            );
        }

        Ok(TaskOutcome::Applied {
            height: block.height,
            new_txs: applied.new_txs,
            reconnected,
        })
    }

    fn fail_task(&self, task: FetchTask, err: &IndexerError) -> TaskOutcome {
        let hash = task.block_hash.clone();
        let mut inner = self.inner.write();
        match inner.queue.fail(task, self.config.max_task_retries) {
            RetryDecision::Requeued { error_count } => {
                tracing::warn!(hash = %hash, error_count, error = %err, "block fetch failed, requeued");
                TaskOutcome::Requeued { hash, error_count }
            }
            RetryDecision::Dropped { error_count } => {
                self.dropped_tasks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(hash = %hash, error_count, error = %err, "retry ceiling exceeded, task dropped");
                if inner.queue.is_empty() {
                    // Let the next poll relaunch the walk from the tip.
                    inner.state.in_sync_pass = false;
                    inner.state.last_seen_hash = None;
                }
                TaskOutcome::Dropped { hash, error_count }
            }
        }
    }

    // ─── Prune ────────────────────────────────────────────────────────────

    /// Evict everything outside the window around `local_height`.
    ///
    /// The plan is computed under the read lock and applied in chunks of
    /// `prune_chunk_size`, releasing the write lock between chunks.
    pub async fn prune(&self) -> PruneStats {
        let window = self.config.prune_window;
        let plan = {
            let inner = self.inner.read();
            inner.index.plan_prune(inner.state.local_height, window)
        };

        let mut stats = PruneStats::default();
        for chunk in plan.evictions.chunks(self.config.prune_chunk_size) {
            let ops = self
                .inner
                .write()
                .index
                .apply_evictions(chunk, plan.local_height, window);
            for op in &ops {
                match op {
                    StoreOp::DeleteEntry(_) => stats.entries += 1,
                    StoreOp::DeleteTx(_) => stats.txs += 1,
                    StoreOp::DeleteSpent(_) => stats.spent += 1,
                    _ => {}
                }
            }
            self.persist_ops(ops).await;
            tokio::task::yield_now().await;
        }
        stats
    }

    // ─── Query ────────────────────────────────────────────────────────────

    /// Look up the transactions paying `address`.
    pub fn query(&self, address: &str, query: &TxQuery) -> TxPage {
        self.inner
            .read()
            .index
            .query(address, query, self.config.page_size)
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.read().state.clone()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.read().queue.len()
    }

    /// Run `f` against the index under the read lock.
    pub fn read_index<R>(&self, f: impl FnOnce(&AddressIndex) -> R) -> R {
        f(&self.inner.read().index)
    }

    pub fn status(&self) -> SyncStatus {
        let inner = self.inner.read();
        SyncStatus {
            local_height: inner.state.local_height,
            best_known_height: inner.state.best_known_height,
            in_sync_pass: inner.state.in_sync_pass,
            queued_tasks: inner.queue.len(),
            dropped_tasks: self.dropped_tasks.load(Ordering::Relaxed),
            addresses: inner.index.address_count(),
            transactions: inner.index.tx_count(),
            spent_outputs: inner.index.spent_count(),
            last_synced_at: inner.last_synced_at,
            persistence: self.persist.health().stats(),
        }
    }

    // ─── Loops ────────────────────────────────────────────────────────────

    /// Spawn the poller and the fetch worker. Both stop when `shutdown`
    /// flips to `true` or its sender is dropped.
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> SyncHandle {
        let poller = tokio::spawn(Arc::clone(self).poll_loop(shutdown.clone()));
        let worker = tokio::spawn(Arc::clone(self).fetch_loop(shutdown));
        SyncHandle { poller, worker }
    }

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.poll_head().await {
                tracing::warn!(error = %e, "chain info poll failed");
            }
        }
        tracing::info!("head poller stopped");
    }

    async fn fetch_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.fetch_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.process_next_task().await {
                tracing::error!(error = %e, "fetch worker step failed");
            }
        }
        tracing::info!("fetch worker stopped");
    }

    /// Flush queued store writes. Call after the loops have stopped.
    pub async fn shutdown(&self) {
        self.persist.shutdown().await;
    }

    // ─── Helpers ──────────────────────────────────────────────────────────

    async fn remote<T>(
        &self,
        call: impl Future<Output = Result<T, IndexerError>>,
    ) -> Result<T, IndexerError> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(IndexerError::Timeout {
                ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn persist_ops(&self, ops: Vec<StoreOp>) {
        if let Err(e) = self.persist.submit_all(ops).await {
            tracing::warn!(error = %e, "store writes not queued");
        }
    }

    fn publish(&self, notifications: &[(String, Transaction)]) {
        for (address, tx) in notifications {
            match serde_json::to_string(tx) {
                Ok(payload) => self.publisher.publish(address, &payload),
                Err(e) => tracing::warn!(address = %address, error = %e, "notification not encoded"),
            }
        }
    }
}

/// Join handles for the two background loops.
pub struct SyncHandle {
    pub poller: JoinHandle<()>,
    pub worker: JoinHandle<()>,
}

impl SyncHandle {
    /// Wait for both loops to exit.
    pub async fn join(self) {
        for (name, handle) in [("poller", self.poller), ("worker", self.worker)] {
            if let Err(e) = handle.await {
                tracing::error!(loop_name = name, error = %e, "sync loop panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NoopPublisher;
    use crate::store::MemoryKvStore;
    use crate::types::{Block, ChainInfo, Output, ScriptPubKey};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Scripted linear chain `h1 … hN` with injectable failures.
    #[derive(Default)]
    struct FixtureChain {
        blocks: Mutex<HashMap<String, Block>>,
        tip: Mutex<Option<(u64, String)>>,
        failing: Mutex<HashSet<String>>,
        fetches: Mutex<Vec<String>>,
    }

    fn hash(height: u64) -> String {
        format!("h{height}")
    }

    fn txid(height: u64, n: u32) -> String {
        format!("{:056x}{n:08x}", height)
    }

    impl FixtureChain {
        fn with_height(top: u64) -> Self {
            let chain = Self::default();
            chain.extend_to(top);
            chain
        }

        /// One transaction per block paying `addr<height>` and `shared`.
        fn extend_to(&self, top: u64) {
            let mut blocks = self.blocks.lock();
            for height in 1..=top {
                blocks.entry(hash(height)).or_insert_with(|| Block {
                    hash: hash(height),
                    height,
                    time: height as i64 * 600,
                    median_time: height as i64 * 600 - 300,
                    previous_hash: hash(height - 1),
                    transactions: vec![Transaction {
                        txid: txid(height, 0),
                        height: 0,
                        time: 0,
                        median_time: 0,
                        inputs: vec![],
                        outputs: vec![Output {
                            n: 0,
                            value: 1.0,
                            script_pubkey: ScriptPubKey {
                                addresses: vec![format!("addr{height}"), "shared".into()],
                                ..Default::default()
                            },
                            spent: false,
                        }],
                    }],
                });
            }
            *self.tip.lock() = Some((top, hash(top)));
        }
    }

    #[async_trait]
    impl ChainSource for FixtureChain {
        async fn chain_info(&self) -> Result<ChainInfo, IndexerError> {
            let (blocks, best) = self
                .tip
                .lock()
                .clone()
                .ok_or_else(|| IndexerError::Rpc("connection refused".into()))?;
            Ok(ChainInfo {
                chain: "regtest".into(),
                blocks,
                headers: blocks,
                best_block_hash: best,
            })
        }

        async fn block(&self, hash: &str) -> Result<Block, IndexerError> {
            self.fetches.lock().push(hash.to_string());
            if self.failing.lock().contains(hash) {
                return Err(IndexerError::Rpc("503 Service Unavailable".into()));
            }
            self.blocks
                .lock()
                .get(hash)
                .cloned()
                .ok_or_else(|| IndexerError::Rpc(format!("unknown block {hash}")))
        }
    }

    fn config(window: u64) -> IndexerConfig {
        IndexerConfig {
            prune_window: window,
            prune_chunk_size: 2,
            ..Default::default()
        }
    }

    fn make_driver(chain: Arc<FixtureChain>, window: u64) -> SyncDriver {
        SyncDriver::with_index(
            config(window),
            chain,
            Arc::new(MemoryKvStore::new()),
            Arc::new(NoopPublisher),
            AddressIndex::new(),
        )
    }

    async fn drain(driver: &SyncDriver) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match driver.process_next_task().await.unwrap() {
                TaskOutcome::Idle => return outcomes,
                other => outcomes.push(other),
            }
        }
    }

    #[tokio::test]
    async fn first_poll_places_frontier_below_tip() {
        let chain = Arc::new(FixtureChain::with_height(1000));
        let driver = make_driver(chain, 6);

        let outcome = driver.poll_head().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Bootstrapped {
                local_height: 994,
                best_height: 1000
            }
        );
        let state = driver.sync_state();
        assert!(state.in_sync_pass);
        assert_eq!(driver.queue_len(), 1);

        // A second poll while the walk runs launches nothing.
        assert_eq!(driver.poll_head().await.unwrap(), PollOutcome::Busy);
        assert_eq!(driver.queue_len(), 1);
    }

    #[tokio::test]
    async fn walk_descends_to_frontier_and_reconnects() {
        let chain = Arc::new(FixtureChain::with_height(1000));
        let driver = make_driver(chain.clone(), 6);
        driver.poll_head().await.unwrap();

        let outcomes = drain(&driver).await;
        let heights: Vec<u64> = outcomes
            .iter()
            .map(|o| match o {
                TaskOutcome::Applied { height, .. } => *height,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(heights, vec![1000, 999, 998, 997, 996, 995]);
        assert!(matches!(
            outcomes.last(),
            Some(TaskOutcome::Applied { reconnected: true, .. })
        ));

        let state = driver.sync_state();
        assert_eq!(state.local_height, 1000);
        assert!(!state.in_sync_pass);
        driver.read_index(|index| {
            assert_eq!(index.address_count(), 7); // addr995..addr1000 + shared
            for (_, entry) in index.entries() {
                assert!(entry.within_window(1000, 6));
            }
        });
        driver.shutdown().await;
    }

    #[tokio::test]
    async fn new_tip_walks_only_the_gap() {
        let chain = Arc::new(FixtureChain::with_height(1000));
        let driver = make_driver(chain.clone(), 6);
        driver.poll_head().await.unwrap();
        drain(&driver).await;
        assert_eq!(driver.poll_head().await.unwrap(), PollOutcome::Unchanged);

        chain.extend_to(1003);
        chain.fetches.lock().clear();
        assert_eq!(
            driver.poll_head().await.unwrap(),
            PollOutcome::Enqueued {
                best_height: 1003,
                hash: hash(1003)
            }
        );
        drain(&driver).await;

        assert_eq!(*chain.fetches.lock(), vec![hash(1003), hash(1002), hash(1001)]);
        assert_eq!(driver.sync_state().local_height, 1003);
        let status = driver.status();
        assert_eq!(status.best_known_height, 1003);
        assert!(status.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn zero_height_block_counts_as_failure() {
        let chain = Arc::new(FixtureChain::with_height(10));
        chain.blocks.lock().get_mut(&hash(10)).unwrap().height = 0;
        let driver = make_driver(chain, 3);
        driver.poll_head().await.unwrap();

        assert_eq!(
            driver.process_next_task().await.unwrap(),
            TaskOutcome::Requeued {
                hash: hash(10),
                error_count: 1
            }
        );
        assert_eq!(driver.queue_len(), 1);
    }

    #[tokio::test]
    async fn retry_ceiling_drops_task_and_rearms_poller() {
        let chain = Arc::new(FixtureChain::with_height(10));
        chain.failing.lock().insert(hash(10));
        let driver = make_driver(chain.clone(), 3);
        driver.poll_head().await.unwrap();

        for attempt in 1..=8 {
            assert_eq!(
                driver.process_next_task().await.unwrap(),
                TaskOutcome::Requeued {
                    hash: hash(10),
                    error_count: attempt
                }
            );
        }
        assert_eq!(
            driver.process_next_task().await.unwrap(),
            TaskOutcome::Dropped {
                hash: hash(10),
                error_count: 9
            }
        );
        assert_eq!(driver.queue_len(), 0);
        assert_eq!(driver.process_next_task().await.unwrap(), TaskOutcome::Idle);
        assert_eq!(driver.status().dropped_tasks, 1);

        // The node recovers; the next poll relaunches the walk.
        chain.failing.lock().clear();
        assert!(matches!(
            driver.poll_head().await.unwrap(),
            PollOutcome::Enqueued { .. }
        ));
        drain(&driver).await;
        assert_eq!(driver.sync_state().local_height, 10);
    }

    #[tokio::test]
    async fn failed_poll_changes_nothing() {
        let chain = Arc::new(FixtureChain::default());
        let driver = make_driver(chain, 6);
        assert!(matches!(driver.poll_head().await, Err(IndexerError::Rpc(_))));
        assert!(!driver.sync_state().bootstrapped);
        assert_eq!(driver.queue_len(), 0);
    }

    #[tokio::test]
    async fn notifications_published_per_address_update() {
        #[derive(Default)]
        struct Recorder(Mutex<Vec<(String, String)>>);
        impl Publisher for Recorder {
            fn publish(&self, topic: &str, payload: &str) {
                self.0.lock().push((topic.to_string(), payload.to_string()));
            }
        }

        let chain = Arc::new(FixtureChain::with_height(5));
        let recorder = Arc::new(Recorder::default());
        let driver = SyncDriver::with_index(
            config(2),
            chain,
            Arc::new(MemoryKvStore::new()),
            recorder.clone(),
            AddressIndex::new(),
        );
        driver.poll_head().await.unwrap();
        driver.process_next_task().await.unwrap();

        let published = recorder.0.lock().clone();
        let topics: Vec<&str> = published.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(topics, vec!["addr5", "shared"]);
        let tx: Transaction = serde_json::from_str(&published[0].1).unwrap();
        assert_eq!(tx.txid, txid(5, 0));
        assert_eq!(tx.height, 5);
    }
}
