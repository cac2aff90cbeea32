//! HTTP client for the node's REST interface, backed by `reqwest`.
//!
//! Endpoints:
//! - `GET {base}/rest/chaininfo.json`
//! - `GET {base}/rest/block/{hash}.json`

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use txindex_core::error::IndexerError;
use txindex_core::source::ChainSource;
use txindex_core::types::{Block, ChainInfo};

/// Configuration for `RestChainClient`.
#[derive(Debug, Clone)]
pub struct RestClientConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
}

impl Default for RestClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("txindex/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Reads chain tip and blocks from a node's REST interface.
pub struct RestChainClient {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl RestChainClient {
    /// Create a client for the node at `base_url` (e.g. `http://127.0.0.1:8332`).
    pub fn new(base_url: impl Into<String>, config: RestClientConfig) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| IndexerError::Config(format!("http client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(base_url: impl Into<String>) -> Result<Self, IndexerError> {
        Self::new(base_url, RestClientConfig::default())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, IndexerError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(url = %url, "GET");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_err(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Rpc(format!(
                "HTTP {status}: {}",
                body.trim()
            )));
        }

        let body = resp.bytes().await.map_err(|e| self.transport_err(e))?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn transport_err(&self, e: reqwest::Error) -> IndexerError {
        if e.is_timeout() {
            IndexerError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            IndexerError::Rpc(e.to_string())
        }
    }
}

#[async_trait]
impl ChainSource for RestChainClient {
    async fn chain_info(&self) -> Result<ChainInfo, IndexerError> {
        self.get_json("/rest/chaininfo.json").await
    }

    async fn block(&self, hash: &str) -> Result<Block, IndexerError> {
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IndexerError::InvalidBlock {
                hash: hash.to_string(),
                reason: "malformed hash".into(),
            });
        }
        self.get_json(&format!("/rest/block/{hash}.json")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    const TIP: &str = "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054";

    async fn chaininfo() -> Json<Value> {
        Json(json!({
            "chain": "main",
            "blocks": 812_345,
            "headers": 812_345,
            "bestblockhash": TIP,
            "difficulty": 57_321_508_229_258.04,
        }))
    }

    async fn block(Path(file): Path<String>) -> Result<Json<Value>, (StatusCode, String)> {
        let hash = file.trim_end_matches(".json");
        if hash != TIP {
            return Err((StatusCode::NOT_FOUND, format!("{hash} not found\r\n")));
        }
        Ok(Json(json!({
            "hash": TIP,
            "height": 812_345,
            "time": 1_698_000_000,
            "mediantime": 1_697_998_000,
            "previousblockhash": "00000000000000000001b2ef9e7dcd5e0c2b0a84bff7ab1c9ff67e5a9d42e48b",
            "tx": [{
                "txid": "a1075db55d416d3ca199f55b6084e2115b9345e16c5cf302fc80e9d5fbf5d48d",
                "vin": [{ "coinbase": "0339650c" }],
                "vout": [{
                    "n": 0,
                    "value": 6.25,
                    "scriptPubKey": { "address": "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh", "type": "witness_v0_keyhash" }
                }]
            }]
        })))
    }

    async fn serve() -> String {
        let app = Router::new()
            .route("/rest/chaininfo.json", get(chaininfo))
            .route("/rest/block/:file", get(block));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn reads_chain_info() {
        let client = RestChainClient::default_for(serve().await).unwrap();
        assert!(!client.base_url().ends_with('/'));
        let info = client.chain_info().await.unwrap();
        assert_eq!(info.blocks, 812_345);
        assert_eq!(info.best_block_hash, TIP);
    }

    #[tokio::test]
    async fn reads_block_with_transactions() {
        let client = RestChainClient::default_for(serve().await).unwrap();
        let block = client.block(TIP).await.unwrap();
        assert_eq!(block.height, 812_345);
        assert_eq!(block.median_time, 1_697_998_000);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(
            block.transactions[0].output_addresses(),
            vec!["bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh"]
        );
    }

    #[tokio::test]
    async fn http_error_is_transient_rpc_error() {
        let client = RestChainClient::default_for(serve().await).unwrap();
        let err = client.block(&"ff".repeat(32)).await.unwrap_err();
        assert!(matches!(&err, IndexerError::Rpc(msg) if msg.starts_with("HTTP 404")));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn rejects_malformed_hash_without_request() {
        let client = RestChainClient::default_for("http://127.0.0.1:1").unwrap();
        let err = client.block("../chaininfo").await.unwrap_err();
        assert!(matches!(err, IndexerError::InvalidBlock { .. }));
    }

    #[tokio::test]
    async fn unreachable_node_is_rpc_error() {
        let client = RestChainClient::new(
            "http://127.0.0.1:1",
            RestClientConfig {
                request_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        )
        .unwrap();
        let err = client.chain_info().await.unwrap_err();
        assert!(err.is_transient(), "unexpected {err:?}");
    }
}
