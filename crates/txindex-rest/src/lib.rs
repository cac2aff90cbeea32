//! txindex-rest: `ChainSource` over a full node's unauthenticated REST
//! interface (`-rest=1`).

pub mod client;

pub use client::{RestChainClient, RestClientConfig};
