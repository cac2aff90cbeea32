//! Chain payloads as returned by the node's REST interface, and the
//! entities the index owns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ─── ChainInfo ────────────────────────────────────────────────────────────────

/// Response of `GET /rest/chaininfo.json`. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    /// Network name (`"main"`, `"test"`, `"regtest"`).
    pub chain: String,
    /// Height of the best validated block.
    pub blocks: u64,
    /// Height of the best known header.
    #[serde(default)]
    pub headers: u64,
    /// Hash of the best block.
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: String,
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// Response of `GET /rest/block/<hash>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    /// Zero means the node returned a placeholder; treated as a fetch failure.
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub time: i64,
    #[serde(rename = "mediantime", default)]
    pub median_time: i64,
    /// Empty for the genesis block.
    #[serde(rename = "previousblockhash", default)]
    pub previous_hash: String,
    #[serde(rename = "tx", default)]
    pub transactions: Vec<Transaction>,
}

// ─── Transaction ──────────────────────────────────────────────────────────────

/// A transaction as embedded in a block, plus the confirmation metadata
/// attached when the index accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,
    /// Height of the confirming block.
    #[serde(default)]
    pub height: u64,
    #[serde(default)]
    pub time: i64,
    #[serde(rename = "mediantime", default)]
    pub median_time: i64,
    #[serde(rename = "vin", default)]
    pub inputs: Vec<Input>,
    #[serde(rename = "vout", default)]
    pub outputs: Vec<Output>,
}

impl Transaction {
    /// Every address paid by this transaction, in output order, deduplicated.
    pub fn output_addresses(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for output in &self.outputs {
            for addr in output.addresses() {
                if !seen.contains(&addr) {
                    seen.push(addr);
                }
            }
        }
        seen
    }

    /// Outpoints consumed by this transaction. Coinbase inputs carry no
    /// previous txid and are skipped.
    pub fn spent_outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().filter_map(|input| match (&input.txid, input.vout) {
            (Some(txid), Some(vout)) if is_txid(txid) => Some(OutPoint::new(txid.clone(), vout)),
            _ => None,
        })
    }

    /// Returns `true` if any output carries the spent annotation.
    pub fn has_spent_output(&self) -> bool {
        self.outputs.iter().any(|o| o.spent)
    }
}

/// A transaction input. Coinbase inputs have neither `txid` nor `vout`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
}

/// A transaction output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Output index within the transaction.
    pub n: u32,
    #[serde(default)]
    pub value: f64,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pubkey: ScriptPubKey,
    /// Query-time annotation only; not authoritative chain state.
    #[serde(default)]
    pub spent: bool,
}

impl Output {
    /// Addresses from both the legacy `addresses[]` list and the newer
    /// singular `address` field.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.script_pubkey
            .addresses
            .iter()
            .map(String::as_str)
            .chain(self.script_pubkey.address.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

// ─── OutPoint ─────────────────────────────────────────────────────────────────

/// A reference to a single output: `<txid>_<vout>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.txid, self.vout)
    }
}

impl FromStr for OutPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once('_')
            .ok_or_else(|| format!("missing '_' separator in outpoint {s:?}"))?;
        let vout = vout
            .parse::<u32>()
            .map_err(|e| format!("bad vout in outpoint {s:?}: {e}"))?;
        Ok(Self::new(txid, vout))
    }
}

/// A transaction id is 32 bytes of hex.
pub fn is_txid(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

// ─── AddressIndexEntry ────────────────────────────────────────────────────────

/// Per-address index entry: the ordered list of transaction ids that pay
/// the address, and the height at which it was last touched.
///
/// Pruning reads only `last_touched_height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressIndexEntry {
    pub last_touched_height: u64,
    pub first_seen_height: u64,
    pub txs: Vec<String>,
}

impl AddressIndexEntry {
    pub fn new(height: u64) -> Self {
        Self {
            last_touched_height: height,
            first_seen_height: height,
            txs: Vec::new(),
        }
    }

    /// Number of transactions referencing the address.
    pub fn count(&self) -> usize {
        self.txs.len()
    }

    /// Append `txid` unless already listed. Returns `true` if it was added.
    pub fn push(&mut self, txid: &str, height: u64) -> bool {
        if self.txs.iter().any(|t| t == txid) {
            return false;
        }
        self.txs.push(txid.to_string());
        self.last_touched_height = height;
        true
    }

    /// Returns `true` if `last_touched_height` lies in
    /// `[local_height - window, local_height]`.
    pub fn within_window(&self, local_height: u64, window: u64) -> bool {
        let floor = local_height.saturating_sub(window);
        (floor..=local_height).contains(&self.last_touched_height)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TXID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn decodes_rest_block() {
        let raw = serde_json::json!({
            "hash": "000000000000000000024bead8df69990852c202db0e0097c1a12ea637d7e96d",
            "confirmations": 3,
            "height": 1000,
            "time": 1_600_000_000,
            "mediantime": 1_599_999_000,
            "previousblockhash": "00000000000000000001e4f3c7c1b0c0c1b6a1a0f6f1a0e0e0f0a0b0c0d0e0f0",
            "nTx": 2,
            "tx": [
                {
                    "txid": TXID_A,
                    "vin": [{ "coinbase": "03e8030101", "sequence": 4294967295u64 }],
                    "vout": [
                        { "n": 0, "value": 6.25, "scriptPubKey": { "addresses": ["1A"], "type": "pubkeyhash" } }
                    ]
                },
                {
                    "txid": "b".repeat(64),
                    "vin": [{ "txid": TXID_A, "vout": 0 }],
                    "vout": [
                        { "n": 0, "value": 1.0, "scriptPubKey": { "address": "bc1q" } },
                        { "n": 1, "value": 5.0, "scriptPubKey": { "type": "nulldata" } }
                    ]
                }
            ]
        });
        let block: Block = serde_json::from_value(raw).unwrap();
        assert_eq!(block.height, 1000);
        assert_eq!(block.transactions.len(), 2);
        assert_eq!(block.transactions[0].output_addresses(), vec!["1A"]);
        assert_eq!(block.transactions[1].output_addresses(), vec!["bc1q"]);
        assert_eq!(block.transactions[0].spent_outpoints().count(), 0);
        let spent: Vec<_> = block.transactions[1].spent_outpoints().collect();
        assert_eq!(spent, vec![OutPoint::new(TXID_A, 0)]);
    }

    #[test]
    fn missing_height_defaults_to_zero() {
        let block: Block = serde_json::from_value(serde_json::json!({ "hash": "00ff" })).unwrap();
        assert_eq!(block.height, 0);
        assert!(block.transactions.is_empty());
    }

    #[test]
    fn outpoint_display_and_parse() {
        let op = OutPoint::new(TXID_A, 7);
        let s = op.to_string();
        assert_eq!(s, format!("{TXID_A}_7"));
        assert_eq!(s.parse::<OutPoint>().unwrap(), op);
        assert!("no-separator".parse::<OutPoint>().is_err());
        assert!(format!("{TXID_A}_x").parse::<OutPoint>().is_err());
    }

    #[test]
    fn entry_push_is_idempotent() {
        let mut entry = AddressIndexEntry::new(10);
        assert!(entry.push("t1", 10));
        assert!(!entry.push("t1", 12));
        assert_eq!(entry.last_touched_height, 10);
        assert!(entry.push("t2", 12));
        assert_eq!(entry.count(), 2);
        assert_eq!(entry.first_seen_height, 10);
        assert_eq!(entry.last_touched_height, 12);
    }

    #[test]
    fn entry_window_bounds() {
        let entry = AddressIndexEntry::new(994);
        assert!(entry.within_window(1000, 6));
        assert!(!entry.within_window(1001, 6));
        assert!(!entry.within_window(993, 6)); // touched above local height
    }

    #[test]
    fn txid_shape() {
        assert!(is_txid(TXID_A));
        assert!(!is_txid("abc"));
        assert!(!is_txid(&"z".repeat(64)));
    }
}
