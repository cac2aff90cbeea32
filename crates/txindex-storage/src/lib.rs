//! txindex-storage: persistent backends for the address index.
//!
//! Backends:
//! - `txindex_core::MemoryKvStore`: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKvStore;
