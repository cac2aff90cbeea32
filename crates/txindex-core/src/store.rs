//! Persistent store contract, key namespaces and bootstrap reload.
//!
//! Every in-memory entity is mirrored under a prefixed key:
//!
//! ```text
//! index_<address>       → JSON AddressIndexEntry
//! txs_<txid>            → JSON Transaction
//! spent_<txid>_<vout>   → true
//! ```
//!
//! There is no schema version; changing an entity's shape means wiping the
//! store and resyncing from the chain.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;

use crate::error::IndexerError;
use crate::index::AddressIndex;
use crate::types::{AddressIndexEntry, OutPoint, Transaction};

/// A raw key/value pair yielded by a full scan.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Ordered byte-key storage.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError>;

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexerError>;

    async fn delete(&self, key: &[u8]) -> Result<(), IndexerError>;

    /// Every pair in key order.
    fn scan(&self) -> BoxStream<'_, Result<KvPair, IndexerError>>;
}

// ─── Keys ─────────────────────────────────────────────────────────────────────

const INDEX_PREFIX: &str = "index_";
const TX_PREFIX: &str = "txs_";
const SPENT_PREFIX: &str = "spent_";

/// A namespaced store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKey {
    Index(String),
    Tx(String),
    Spent(OutPoint),
}

impl StoreKey {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Index(addr) => format!("{INDEX_PREFIX}{addr}"),
            Self::Tx(txid) => format!("{TX_PREFIX}{txid}"),
            Self::Spent(op) => format!("{SPENT_PREFIX}{op}"),
        }
        .into_bytes()
    }

    /// Classify a raw key by namespace. Returns `None` for foreign keys.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let s = std::str::from_utf8(raw).ok()?;
        if let Some(addr) = s.strip_prefix(INDEX_PREFIX) {
            return Some(Self::Index(addr.to_string()));
        }
        if let Some(txid) = s.strip_prefix(TX_PREFIX) {
            return Some(Self::Tx(txid.to_string()));
        }
        if let Some(op) = s.strip_prefix(SPENT_PREFIX) {
            return op.parse().ok().map(Self::Spent);
        }
        None
    }
}

// ─── Operations ───────────────────────────────────────────────────────────────

/// One mutation to mirror into the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    PutEntry(String, AddressIndexEntry),
    PutTx(Transaction),
    PutSpent(OutPoint),
    DeleteEntry(String),
    DeleteTx(String),
    DeleteSpent(OutPoint),
}

impl StoreOp {
    pub fn key(&self) -> StoreKey {
        match self {
            Self::PutEntry(addr, _) | Self::DeleteEntry(addr) => StoreKey::Index(addr.clone()),
            Self::PutTx(tx) => StoreKey::Tx(tx.txid.clone()),
            Self::DeleteTx(txid) => StoreKey::Tx(txid.clone()),
            Self::PutSpent(op) | Self::DeleteSpent(op) => StoreKey::Spent(op.clone()),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Self::DeleteEntry(_) | Self::DeleteTx(_) | Self::DeleteSpent(_)
        )
    }

    /// Apply this operation to `store`.
    pub async fn apply(&self, store: &dyn KvStore) -> Result<(), IndexerError> {
        let key = self.key().encode();
        match self {
            Self::PutEntry(_, entry) => store.put(&key, &serde_json::to_vec(entry)?).await,
            Self::PutTx(tx) => store.put(&key, &serde_json::to_vec(tx)?).await,
            Self::PutSpent(_) => store.put(&key, b"true").await,
            Self::DeleteEntry(_) | Self::DeleteTx(_) | Self::DeleteSpent(_) => {
                store.delete(&key).await
            }
        }
    }
}

// ─── Bootstrap ────────────────────────────────────────────────────────────────

/// Counts from a bootstrap reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub entries: usize,
    pub txs: usize,
    pub spent: usize,
    pub skipped: usize,
}

/// Rebuild the in-memory index from a full scan of `store`.
///
/// Unparseable records are logged and skipped; only a failing scan is an
/// error.
pub async fn load_index(store: &dyn KvStore) -> Result<(AddressIndex, LoadStats), IndexerError> {
    tracing::info!("loading index from store");
    let mut index = AddressIndex::new();
    let mut stats = LoadStats::default();
    let mut pairs = store.scan();

    while let Some(pair) = pairs.next().await {
        let (key, value) = pair?;
        let Some(decoded) = StoreKey::decode(&key) else {
            tracing::warn!(key = %String::from_utf8_lossy(&key), "skipping record outside known namespaces");
            stats.skipped += 1;
            continue;
        };
        match decoded {
            StoreKey::Index(addr) => match serde_json::from_slice::<AddressIndexEntry>(&value) {
                Ok(entry) => {
                    index.restore_entry(addr, entry);
                    stats.entries += 1;
                }
                Err(e) => {
                    tracing::warn!(address = %addr, error = %e, "skipping corrupt index entry");
                    stats.skipped += 1;
                }
            },
            StoreKey::Tx(txid) => match serde_json::from_slice::<Transaction>(&value) {
                Ok(tx) if tx.txid == txid => {
                    index.restore_tx(tx);
                    stats.txs += 1;
                }
                Ok(tx) => {
                    tracing::warn!(key = %txid, txid = %tx.txid, "skipping transaction stored under another id");
                    stats.skipped += 1;
                }
                Err(e) => {
                    tracing::warn!(txid = %txid, error = %e, "skipping corrupt transaction");
                    stats.skipped += 1;
                }
            },
            StoreKey::Spent(op) => {
                index.restore_spent(op);
                stats.spent += 1;
            }
        }
    }

    tracing::info!(
        entries = stats.entries,
        txs = stats.txs,
        spent = stats.spent,
        skipped = stats.skipped,
        "index loaded"
    );
    Ok((index, stats))
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// Ordered in-memory store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, IndexerError> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), IndexerError> {
        self.data.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), IndexerError> {
        self.data.lock().remove(key);
        Ok(())
    }

    fn scan(&self) -> BoxStream<'_, Result<KvPair, IndexerError>> {
        let snapshot: Vec<_> = self
            .data
            .lock()
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.clone())))
            .collect();
        stream::iter(snapshot).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txid(c: char) -> String {
        c.to_string().repeat(64)
    }

    fn tx(id: &str, height: u64) -> Transaction {
        Transaction {
            txid: id.to_string(),
            height,
            time: 0,
            median_time: 0,
            inputs: vec![],
            outputs: vec![],
        }
    }

    #[test]
    fn key_namespaces() {
        let op = OutPoint::new(txid('a'), 3);
        for key in [
            StoreKey::Index("1BoatSLRHtKNngkdXEeobR76b53LETtpyT".into()),
            StoreKey::Tx(txid('b')),
            StoreKey::Spent(op.clone()),
        ] {
            assert_eq!(StoreKey::decode(&key.encode()), Some(key));
        }
        assert_eq!(
            StoreKey::Spent(op).encode(),
            format!("spent_{}_3", txid('a')).into_bytes()
        );
        assert_eq!(StoreKey::decode(b"update_1A"), None);
        assert_eq!(StoreKey::decode(b"spent_garbage"), None);
    }

    #[tokio::test]
    async fn ops_write_expected_values() {
        let store = MemoryKvStore::new();
        let op = OutPoint::new(txid('a'), 0);
        StoreOp::PutSpent(op.clone()).apply(&store).await.unwrap();
        StoreOp::PutTx(tx(&txid('c'), 7)).apply(&store).await.unwrap();

        let spent = store.get(&StoreKey::Spent(op.clone()).encode()).await.unwrap();
        assert_eq!(spent.as_deref(), Some(&b"true"[..]));

        StoreOp::DeleteSpent(op.clone()).apply(&store).await.unwrap();
        assert!(store.get(&StoreKey::Spent(op).encode()).await.unwrap().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn load_skips_corrupt_records() {
        let store = MemoryKvStore::new();
        let mut entry = AddressIndexEntry::new(100);
        entry.push(&txid('a'), 100);
        StoreOp::PutEntry("1A".into(), entry.clone()).apply(&store).await.unwrap();
        StoreOp::PutTx(tx(&txid('a'), 100)).apply(&store).await.unwrap();
        StoreOp::PutSpent(OutPoint::new(txid('a'), 1)).apply(&store).await.unwrap();
        store.put(b"index_1B", b"{not json").await.unwrap();
        store.put(&StoreKey::Tx(txid('d')).encode(), b"[]").await.unwrap();
        store.put(b"update_1A", b"100").await.unwrap();

        let (index, stats) = load_index(&store).await.unwrap();
        assert_eq!(
            stats,
            LoadStats {
                entries: 1,
                txs: 1,
                spent: 1,
                skipped: 3
            }
        );
        assert_eq!(index.entry("1A"), Some(&entry));
        assert!(index.entry("1B").is_none());
        assert!(index.is_spent(&OutPoint::new(txid('a'), 1)));
    }
}
