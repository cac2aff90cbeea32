//! txindex-server: HTTP query surface and websocket pub/sub for a running
//! `SyncDriver`.
//!
//! ```text
//! GET /txs/:address?sort=&page=&type=   → JSON array of transactions
//! GET /status                           → sync / index / persistence status
//! GET /ws                               → pub/sub (watchTxs, unsubscribe, publish)
//! ```

pub mod pubsub;
pub mod routes;

use tokio::net::TcpListener;
use tokio::sync::watch;

pub use pubsub::{ClientId, PubSub};
pub use routes::{router, AppState};

/// Serve `state` on `listener` until `shutdown` flips to `true`.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "http server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
