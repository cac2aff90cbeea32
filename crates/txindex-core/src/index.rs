//! In-memory address → transaction index: block application, pruning and
//! lookups.
//!
//! Every mutation returns the `StoreOp`s that mirror it; the caller decides
//! when they reach the store.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::query::{paginate, SortOrder, TxFilter, TxPage, TxQuery};
use crate::store::StoreOp;
use crate::types::{AddressIndexEntry, Block, OutPoint, Transaction};

/// Result of applying one block.
#[derive(Debug, Default)]
pub struct BlockApplied {
    /// Transactions that were not yet indexed.
    pub new_txs: usize,
    /// Mutations to mirror into the store.
    pub ops: Vec<StoreOp>,
    /// `(address, transaction)` for every address that gained a transaction.
    pub notifications: Vec<(String, Transaction)>,
}

/// One eviction decided by a prune plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eviction {
    Entry(String),
    Tx(String),
    Spent(OutPoint),
}

/// Evictions computed from a snapshot of the index.
///
/// Entries come first, then the transactions only they referenced, then
/// spent marks whose transaction is gone.
#[derive(Debug, Clone, Default)]
pub struct PrunePlan {
    pub local_height: u64,
    pub window: u64,
    pub evictions: Vec<Eviction>,
}

impl PrunePlan {
    pub fn is_empty(&self) -> bool {
        self.evictions.is_empty()
    }
}

/// Address entries, transactions and spent marks.
#[derive(Debug, Default, Clone)]
pub struct AddressIndex {
    entries: HashMap<String, AddressIndexEntry>,
    txs: HashMap<String, Transaction>,
    spent: HashSet<OutPoint>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Bootstrap ────────────────────────────────────────────────────────

    pub(crate) fn restore_entry(&mut self, address: String, entry: AddressIndexEntry) {
        self.entries.insert(address, entry);
    }

    pub(crate) fn restore_tx(&mut self, tx: Transaction) {
        self.txs.insert(tx.txid.clone(), tx);
    }

    pub(crate) fn restore_spent(&mut self, op: OutPoint) {
        self.spent.insert(op);
    }

    // ─── Apply ────────────────────────────────────────────────────────────

    /// Index every transaction in `block` that is not already present.
    ///
    /// New transactions get the block's height and times; each address they
    /// pay gains the txid and is touched at `touch_height`. Inputs mark the
    /// outpoints they consume as spent. Applying the same block twice
    /// leaves the index unchanged.
    pub fn apply_block(&mut self, block: &Block, touch_height: u64) -> BlockApplied {
        let mut applied = BlockApplied::default();
        let mut touched: BTreeSet<String> = BTreeSet::new();

        for tx in &block.transactions {
            for op in tx.spent_outpoints() {
                if self.spent.insert(op.clone()) {
                    applied.ops.push(StoreOp::PutSpent(op));
                }
            }

            if self.txs.contains_key(&tx.txid) {
                continue;
            }
            // Nothing would list it, so nothing could ever prune it.
            if tx.output_addresses().is_empty() {
                continue;
            }

            let mut tx = tx.clone();
            tx.height = block.height;
            tx.time = block.time;
            tx.median_time = block.median_time;

            for addr in tx.output_addresses() {
                let entry = self
                    .entries
                    .entry(addr.to_string())
                    .or_insert_with(|| AddressIndexEntry::new(touch_height));
                if entry.push(&tx.txid, touch_height) {
                    touched.insert(addr.to_string());
                    applied.notifications.push((addr.to_string(), tx.clone()));
                }
            }

            applied.ops.push(StoreOp::PutTx(tx.clone()));
            self.txs.insert(tx.txid.clone(), tx);
            applied.new_txs += 1;
        }

        for addr in touched {
            if let Some(entry) = self.entries.get(&addr) {
                applied.ops.push(StoreOp::PutEntry(addr, entry.clone()));
            }
        }
        applied
    }

    // ─── Prune ────────────────────────────────────────────────────────────

    /// Decide what falls outside `[local_height - window, local_height]`.
    pub fn plan_prune(&self, local_height: u64, window: u64) -> PrunePlan {
        let mut evicted_entries = Vec::new();
        let mut retained_txs: HashSet<&str> = HashSet::new();
        let mut candidate_txs: BTreeSet<&str> = BTreeSet::new();

        for (addr, entry) in &self.entries {
            if entry.within_window(local_height, window) {
                retained_txs.extend(entry.txs.iter().map(String::as_str));
            } else {
                evicted_entries.push(addr.clone());
                candidate_txs.extend(entry.txs.iter().map(String::as_str));
            }
        }
        evicted_entries.sort();

        // Transactions no entry lists (e.g. reloaded from an older store) go too.
        candidate_txs.extend(
            self.txs
                .keys()
                .map(String::as_str)
                .filter(|txid| !retained_txs.contains(txid)),
        );
        let evicted_txs: Vec<&str> = candidate_txs
            .into_iter()
            .filter(|txid| !retained_txs.contains(txid) && self.txs.contains_key(*txid))
            .collect();
        let evicted_set: HashSet<&str> = evicted_txs.iter().copied().collect();

        let mut orphan_spent: Vec<&OutPoint> = self
            .spent
            .iter()
            .filter(|op| {
                !self.txs.contains_key(&op.txid) || evicted_set.contains(op.txid.as_str())
            })
            .collect();
        orphan_spent.sort();

        let evictions = evicted_entries
            .into_iter()
            .map(Eviction::Entry)
            .chain(evicted_txs.into_iter().map(|t| Eviction::Tx(t.to_string())))
            .chain(orphan_spent.into_iter().map(|op| Eviction::Spent(op.clone())))
            .collect();

        PrunePlan {
            local_height,
            window,
            evictions,
        }
    }

    /// Apply a slice of a plan. Entries touched back into the window since
    /// the plan was made are kept.
    pub fn apply_evictions(
        &mut self,
        evictions: &[Eviction],
        local_height: u64,
        window: u64,
    ) -> Vec<StoreOp> {
        let mut ops = Vec::with_capacity(evictions.len());
        for eviction in evictions {
            match eviction {
                Eviction::Entry(addr) => {
                    let stale = self
                        .entries
                        .get(addr)
                        .is_some_and(|e| !e.within_window(local_height, window));
                    if stale {
                        self.entries.remove(addr);
                        ops.push(StoreOp::DeleteEntry(addr.clone()));
                    }
                }
                Eviction::Tx(txid) => {
                    if self.txs.remove(txid).is_some() {
                        ops.push(StoreOp::DeleteTx(txid.clone()));
                    }
                }
                Eviction::Spent(op) => {
                    if self.spent.remove(op) {
                        ops.push(StoreOp::DeleteSpent(op.clone()));
                    }
                }
            }
        }
        ops
    }

    /// Plan and apply a full pruning pass in one go.
    pub fn prune(&mut self, local_height: u64, window: u64) -> Vec<StoreOp> {
        let plan = self.plan_prune(local_height, window);
        self.apply_evictions(&plan.evictions, local_height, window)
    }

    // ─── Query ────────────────────────────────────────────────────────────

    /// Transactions paying `address`, annotated, filtered, sorted and paged.
    ///
    /// Listed ids whose transaction is gone are skipped. An unknown address
    /// yields an empty page with `indexed == false`.
    pub fn query(&self, address: &str, query: &TxQuery, page_size: usize) -> TxPage {
        let Some(entry) = self.entries.get(address) else {
            return TxPage::empty(address, query.page);
        };

        let mut txs: Vec<Transaction> = entry
            .txs
            .iter()
            .filter_map(|txid| self.txs.get(txid))
            .map(|tx| self.annotate(tx))
            .filter(|tx| match query.filter {
                TxFilter::All => true,
                TxFilter::Spent => tx.has_spent_output(),
            })
            .collect();

        match query.sort {
            SortOrder::Asc => txs.sort_by_key(|tx| tx.height),
            SortOrder::Desc => txs.sort_by(|a, b| b.height.cmp(&a.height)),
        }

        let total = txs.len();
        TxPage {
            address: address.to_string(),
            indexed: true,
            total,
            page: query.page,
            txs: paginate(txs, query.page, page_size),
        }
    }

    fn annotate(&self, tx: &Transaction) -> Transaction {
        let mut tx = tx.clone();
        for output in &mut tx.outputs {
            output.spent = self
                .spent
                .contains(&OutPoint::new(tx.txid.clone(), output.n));
        }
        tx
    }

    // ─── Accessors ────────────────────────────────────────────────────────

    pub fn entry(&self, address: &str) -> Option<&AddressIndexEntry> {
        self.entries.get(address)
    }

    pub fn tx(&self, txid: &str) -> Option<&Transaction> {
        self.txs.get(txid)
    }

    pub fn is_spent(&self, op: &OutPoint) -> bool {
        self.spent.contains(op)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &AddressIndexEntry)> {
        self.entries.iter()
    }

    pub fn address_count(&self) -> usize {
        self.entries.len()
    }

    pub fn tx_count(&self) -> usize {
        self.txs.len()
    }

    pub fn spent_count(&self) -> usize {
        self.spent.len()
    }
}

/// Structural equality over all three maps; used to compare a reloaded
/// index against the one that wrote the store.
impl PartialEq for AddressIndex {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries && self.txs == other.txs && self.spent == other.spent
    }
}
