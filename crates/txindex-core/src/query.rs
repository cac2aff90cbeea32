//! Query parameters and pagination for address lookups.

use serde::{Deserialize, Serialize};

use crate::types::Transaction;

/// Sort by confirming height.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// `"asc"` sorts ascending; anything else sorts descending.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some(s) if s.eq_ignore_ascii_case("asc") => Self::Asc,
            _ => Self::Desc,
        }
    }
}

/// Which transactions to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxFilter {
    #[default]
    All,
    /// Only transactions with at least one spent output.
    Spent,
}

impl TxFilter {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some(s) if s.eq_ignore_ascii_case("spent") => Self::Spent,
            _ => Self::All,
        }
    }
}

/// A parsed `?sort=&page=&type=` request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxQuery {
    pub sort: SortOrder,
    pub page: usize,
    pub filter: TxFilter,
}

impl TxQuery {
    /// Lenient parse: unknown values fall back to defaults and an
    /// unparseable page is page 0.
    pub fn from_params(sort: Option<&str>, page: Option<&str>, kind: Option<&str>) -> Self {
        Self {
            sort: SortOrder::parse(sort),
            page: page.and_then(|p| p.trim().parse().ok()).unwrap_or(0),
            filter: TxFilter::parse(kind),
        }
    }
}

/// One page of an address lookup.
#[derive(Debug, Clone, Serialize)]
pub struct TxPage {
    pub address: String,
    /// `false` when the address has no index entry.
    pub indexed: bool,
    /// Matching transactions before paging.
    pub total: usize,
    pub page: usize,
    pub txs: Vec<Transaction>,
}

impl TxPage {
    pub fn empty(address: &str, page: usize) -> Self {
        Self {
            address: address.to_string(),
            indexed: false,
            total: 0,
            page,
            txs: Vec::new(),
        }
    }
}

/// Slice out page `page` of `size` items.
///
/// Fewer than one page of items is returned whole. A page that runs past
/// the end yields the partial tail after the last full page, which is empty
/// when the item count is an exact multiple of `size`.
pub fn paginate<T>(mut items: Vec<T>, page: usize, size: usize) -> Vec<T> {
    if size == 0 || items.len() < size {
        return items;
    }
    let tail_start = items.len() / size * size;
    let start = page.saturating_mul(size).min(tail_start);
    let end = (start + size).min(items.len());
    items.truncate(end);
    items.drain(..start);
    items
}
