//! txindex CLI: runs the address → transaction index service.
//!
//! # Commands
//! ```text
//! txindex run     [--config <file.yaml>] [--node-url <url>] [--db <path>] [--listen <addr>]
//! txindex inspect [--config <file.yaml>] [--db <path>] [--address <addr>]
//! txindex config  [--config <file.yaml>]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;

use txindex_core::{load_index, SyncDriver, TxQuery};
use txindex_rest::{RestChainClient, RestClientConfig};
use txindex_server::{AppState, PubSub};
use txindex_storage::SqliteKvStore;

mod logging;
mod settings;

use settings::{Overrides, Settings};

#[derive(Parser)]
#[command(
    name = "txindex",
    about = "Address → transaction index kept in sync with a full node",
    long_about = "
txindex polls a full node's REST interface, walks new blocks back to the
indexed frontier, keeps a pruned address → transaction index in SQLite and
serves it over HTTP and websocket.

ENVIRONMENT VARIABLES:
  TXINDEX_NODE_URL        Node REST base URL
  TXINDEX_DB              SQLite store path
  TXINDEX_LISTEN          HTTP listen address
  TXINDEX_PRUNE_WINDOW    Pruning window in blocks
  RUST_LOG                Overrides the configured log filter
",
    version
)]
struct Cli {
    /// YAML settings file
    #[arg(short, long, global = true, env = "TXINDEX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync loops and the HTTP server until interrupted
    Run(RunArgs),

    /// Load a store and print what it holds
    Inspect {
        /// SQLite store path
        #[arg(long, env = "TXINDEX_DB")]
        db: Option<String>,
        /// Also print the transactions indexed for this address
        #[arg(long)]
        address: Option<String>,
    },

    /// Print the effective settings as YAML
    Config(RunArgs),
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Node REST base URL
    #[arg(long, env = "TXINDEX_NODE_URL")]
    node_url: Option<String>,
    /// SQLite store path
    #[arg(long, env = "TXINDEX_DB")]
    db: Option<String>,
    /// HTTP listen address
    #[arg(long, env = "TXINDEX_LISTEN")]
    listen: Option<String>,
    /// Pruning window in blocks
    #[arg(long, env = "TXINDEX_PRUNE_WINDOW")]
    prune_window: Option<u64>,
    /// Global log level
    #[arg(long)]
    log_level: Option<String>,
    /// Emit JSON logs
    #[arg(long)]
    log_json: bool,
}

impl From<RunArgs> for Overrides {
    fn from(args: RunArgs) -> Self {
        Self {
            node_url: args.node_url,
            db: args.db,
            listen: args.listen,
            prune_window: args.prune_window,
            log_level: args.log_level,
            log_json: args.log_json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            settings.apply(args.into());
            cmd_run(settings).await
        }

        Commands::Inspect { db, address } => {
            settings.apply(Overrides {
                db,
                ..Default::default()
            });
            cmd_inspect(&settings, address.as_deref()).await
        }

        Commands::Config(args) => {
            settings.apply(args.into());
            print!("{}", serde_yaml::to_string(&settings)?);
            Ok(())
        }
    }
}

async fn cmd_run(settings: Settings) -> Result<()> {
    logging::init_tracing(&settings.log);
    settings.indexer.validate()?;

    let store = Arc::new(
        SqliteKvStore::open(&settings.storage.path)
            .await
            .with_context(|| format!("opening store {}", settings.storage.path))?,
    );
    let source = Arc::new(RestChainClient::new(
        settings.indexer.node_url.clone(),
        RestClientConfig {
            request_timeout: settings.indexer.request_timeout(),
            ..Default::default()
        },
    )?);
    let hub = Arc::new(PubSub::new());

    let driver = Arc::new(
        SyncDriver::open(settings.indexer.clone(), source, store.clone(), hub.clone())
            .await
            .context("loading index")?,
    );

    let listener = TcpListener::bind(&settings.server.listen)
        .await
        .with_context(|| format!("binding {}", settings.server.listen))?;

    tracing::info!(
        node = %settings.indexer.node_url,
        store = %settings.storage.path,
        prune_window = settings.indexer.prune_window,
        "txindex starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sync = driver.spawn(shutdown_rx.clone());
    let server = tokio::spawn(txindex_server::serve(
        listener,
        AppState {
            driver: driver.clone(),
            hub,
        },
        shutdown_rx,
    ));

    tokio::signal::ctrl_c()
        .await
        .context("installing ctrl-c handler")?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    sync.join().await;
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "http server failed"),
        Err(e) => tracing::error!(error = %e, "http server task panicked"),
    }

    driver.shutdown().await;
    let persisted = driver.status().persistence;
    tracing::info!(
        written = persisted.written,
        failed = persisted.failed,
        "store writes flushed"
    );
    store.close().await;
    Ok(())
}

async fn cmd_inspect(settings: &Settings, address: Option<&str>) -> Result<()> {
    let store = SqliteKvStore::open(&settings.storage.path)
        .await
        .with_context(|| format!("opening store {}", settings.storage.path))?;
    let (index, stats) = load_index(&store).await?;

    println!("Store: {}", settings.storage.path);
    println!("  records:       {}", store.count().await?);
    println!("  addresses:     {}", stats.entries);
    println!("  transactions:  {}", stats.txs);
    println!("  spent outputs: {}", stats.spent);
    println!("  skipped:       {}", stats.skipped);

    if let Some(address) = address {
        let page = index.query(address, &TxQuery::default(), usize::MAX);
        match index.entry(address) {
            Some(entry) => {
                println!();
                println!(
                    "{address}: {} txs, first seen {}, last touched {}",
                    entry.count(),
                    entry.first_seen_height,
                    entry.last_touched_height
                );
                for tx in &page.txs {
                    let spent = if tx.has_spent_output() { " (spent)" } else { "" };
                    println!("  {:>8}  {}{spent}", tx.height, tx.txid);
                }
            }
            None => println!("\n{address}: not indexed"),
        }
    }

    store.close().await;
    Ok(())
}
