//! Bounded persistence pool.
//!
//! Store mutations are queued on one of `workers` bounded channels and
//! applied by a dedicated task per channel. Ops for the same key always land
//! on the same worker, so a put followed by a delete cannot be reordered.
//! `submit` waits when a channel is full.
//!
//! Write failures are logged and counted, never retried: the index can be
//! rebuilt from the chain.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::IndexerError;
use crate::store::{KvStore, StoreOp};

/// Consecutive failures at which the store is reported unhealthy.
const UNHEALTHY_AFTER: u64 = 5;

/// Store health as seen by the persistence pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Last write succeeded.
    Healthy,
    /// Recent writes failed.
    Degraded,
    /// Writes keep failing.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Write counters shared by all workers.
#[derive(Debug, Default)]
pub struct PersistHealth {
    written: AtomicU64,
    failed: AtomicU64,
    consecutive_failures: AtomicU64,
}

/// Point-in-time copy of `PersistHealth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub status: HealthStatus,
    pub written: u64,
    pub failed: u64,
    pub consecutive_failures: u64,
}

impl PersistHealth {
    fn record_success(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        match self.consecutive_failures.load(Ordering::Relaxed) {
            0 => HealthStatus::Healthy,
            n if n < UNHEALTHY_AFTER => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }

    pub fn stats(&self) -> PersistStats {
        PersistStats {
            status: self.status(),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

/// Fixed pool of store writers fed through bounded channels.
pub struct PersistQueue {
    senders: Mutex<Vec<mpsc::Sender<StoreOp>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    health: Arc<PersistHealth>,
}

impl PersistQueue {
    /// Spawn `workers` writer tasks sharing `capacity` queued ops between
    /// them. Must be called from within a Tokio runtime.
    pub fn spawn(store: Arc<dyn KvStore>, workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let per_worker = (capacity / workers).max(1);
        let health = Arc::new(PersistHealth::default());

        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let (tx, rx) = mpsc::channel(per_worker);
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                id,
                rx,
                Arc::clone(&store),
                Arc::clone(&health),
            )));
        }

        Self {
            senders: Mutex::new(senders),
            workers: Mutex::new(handles),
            health,
        }
    }

    /// Queue one op, waiting for room on its worker's channel.
    pub async fn submit(&self, op: StoreOp) -> Result<(), IndexerError> {
        let sender = {
            let senders = self.senders.lock();
            if senders.is_empty() {
                return Err(IndexerError::Shutdown);
            }
            let shard = shard_for(&op, senders.len());
            senders[shard].clone()
        };
        sender.send(op).await.map_err(|_| IndexerError::Shutdown)
    }

    /// Queue every op in order. Stops at the first rejected op.
    pub async fn submit_all(&self, ops: Vec<StoreOp>) -> Result<(), IndexerError> {
        for op in ops {
            self.submit(op).await?;
        }
        Ok(())
    }

    pub fn health(&self) -> &PersistHealth {
        &self.health
    }

    /// Stop accepting ops, then wait for the workers to drain their queues.
    pub async fn shutdown(&self) {
        self.senders.lock().clear();
        let handles: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "persistence worker panicked");
            }
        }
        tracing::info!(stats = ?self.health.stats(), "persistence drained");
    }
}

fn shard_for(op: &StoreOp, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    op.key().encode().hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<StoreOp>,
    store: Arc<dyn KvStore>,
    health: Arc<PersistHealth>,
) {
    while let Some(op) = rx.recv().await {
        match op.apply(store.as_ref()).await {
            Ok(()) => health.record_success(),
            Err(e) => {
                health.record_failure();
                tracing::warn!(
                    worker = id,
                    key = %String::from_utf8_lossy(&op.key().encode()),
                    error = %e,
                    "store write failed"
                );
            }
        }
    }
    tracing::debug!(worker = id, "persistence worker stopped");
}
