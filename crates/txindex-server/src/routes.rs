//! HTTP handlers.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use txindex_core::query::TxQuery;
use txindex_core::sync::{SyncDriver, SyncStatus};
use txindex_core::types::Transaction;

use crate::pubsub::{handle_socket, PubSub};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub driver: Arc<SyncDriver>,
    pub hub: Arc<PubSub>,
}

/// Query string of `GET /txs/:address`. Every field is optional and parsed
/// leniently.
#[derive(Debug, Default, Deserialize)]
pub struct TxParams {
    pub sort: Option<String>,
    pub page: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub sync: SyncStatus,
    pub ws_clients: usize,
}

/// Build the router with all endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/txs/:address", get(get_txs))
        .route("/status", get(get_status))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Transactions paying `address`. An address with no index entry answers
/// `404` with an empty array.
async fn get_txs(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(params): Query<TxParams>,
) -> Response {
    let query = TxQuery::from_params(
        params.sort.as_deref(),
        params.page.as_deref(),
        params.kind.as_deref(),
    );
    let page = state.driver.query(&address, &query);
    if !page.indexed {
        tracing::debug!(address = %address, "query for unindexed address");
        return (StatusCode::NOT_FOUND, Json(Vec::<Transaction>::new())).into_response();
    }
    Json(page.txs).into_response()
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        sync: state.driver.status(),
        ws_clients: state.hub.client_count(),
    })
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use txindex_core::error::IndexerError;
    use txindex_core::index::AddressIndex;
    use txindex_core::source::ChainSource;
    use txindex_core::store::MemoryKvStore;
    use txindex_core::types::{Block, ChainInfo, Output, ScriptPubKey};
    use txindex_core::IndexerBuilder;

    /// Two blocks; block 2 spends block 1's output.
    struct TwoBlocks;

    fn txid(n: u8) -> String {
        format!("{n:02x}").repeat(32)
    }

    fn block(height: u64) -> Block {
        let inputs = if height == 2 {
            vec![txindex_core::types::Input {
                txid: Some(txid(1)),
                vout: Some(0),
                coinbase: None,
            }]
        } else {
            vec![]
        };
        Block {
            hash: format!("b{height}"),
            height,
            time: 1_000 + height as i64,
            median_time: 900 + height as i64,
            previous_hash: format!("b{}", height - 1),
            transactions: vec![Transaction {
                txid: txid(height as u8),
                height: 0,
                time: 0,
                median_time: 0,
                inputs,
                outputs: vec![Output {
                    n: 0,
                    value: 1.5,
                    script_pubkey: ScriptPubKey {
                        addresses: vec!["carol".into()],
                        ..Default::default()
                    },
                    spent: false,
                }],
            }],
        }
    }

    #[async_trait]
    impl ChainSource for TwoBlocks {
        async fn chain_info(&self) -> Result<ChainInfo, IndexerError> {
            Ok(ChainInfo {
                chain: "regtest".into(),
                blocks: 2,
                headers: 2,
                best_block_hash: "b2".into(),
            })
        }

        async fn block(&self, hash: &str) -> Result<Block, IndexerError> {
            match hash {
                "b2" => Ok(block(2)),
                "b1" => Ok(block(1)),
                other => Err(IndexerError::Rpc(format!("unknown {other}"))),
            }
        }
    }

    async fn serve_synced() -> String {
        let driver = Arc::new(SyncDriver::with_index(
            IndexerBuilder::new().prune_window(2).build_config(),
            Arc::new(TwoBlocks),
            Arc::new(MemoryKvStore::new()),
            Arc::new(txindex_core::NoopPublisher),
            AddressIndex::new(),
        ));
        driver.poll_head().await.unwrap();
        while driver.queue_len() > 0 {
            driver.process_next_task().await.unwrap();
        }

        let state = AppState {
            driver,
            hub: Arc::new(PubSub::new()),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn txs_default_newest_first() {
        let base = serve_synced().await;
        let resp = reqwest::get(format!("{base}/txs/carol")).await.unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        let txs: Vec<Value> = resp.json().await.unwrap();
        let heights: Vec<u64> = txs.iter().map(|t| t["height"].as_u64().unwrap()).collect();
        assert_eq!(heights, vec![2, 1]);
        assert_eq!(txs[1]["mediantime"], 901);
    }

    #[tokio::test]
    async fn txs_spent_filter_and_asc_sort() {
        let base = serve_synced().await;
        let txs: Vec<Value> = reqwest::get(format!("{base}/txs/carol?sort=asc&type=spent&page=x"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0]["txid"], txid(1));
        assert_eq!(txs[0]["vout"][0]["spent"], true);
    }

    #[tokio::test]
    async fn unindexed_address_is_404_with_empty_array() {
        let base = serve_synced().await;
        let resp = reqwest::get(format!("{base}/txs/nobody")).await.unwrap();
        assert_eq!(resp.status().as_u16(), 404);
        let body: Vec<Value> = resp.json().await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn status_reports_sync_progress() {
        let base = serve_synced().await;
        let status: Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["local_height"], 2);
        assert_eq!(status["best_known_height"], 2);
        assert_eq!(status["in_sync_pass"], false);
        assert_eq!(status["transactions"], 2);
        assert_eq!(status["ws_clients"], 0);
        assert_eq!(status["persistence"]["status"], "healthy");
    }
}
