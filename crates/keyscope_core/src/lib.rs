//! # Keyscope Core
//!
//! Key index cache and concurrent batch engine for exploring a key-value
//! store with numbered logical databases.
//!
//! The store can only look up exact keys or glob-scan its whole keyspace.
//! This crate keeps a local, case-insensitive index of every key so that
//! pattern queries never touch the store, and fans get/delete work out
//! through a small bounded connection pool.
//!
//! This crate provides:
//! - Connection pool with a hard bound and lazy dialing
//! - Database discovery and size listing
//! - Per-database key index cache, rebuilt in the background
//! - Fuzzy (glob) queries against the cache
//! - Chunked, bounded-concurrency get/delete/set
//! - The [`Explorer`] session tying it all together
//!
//! ## Key Invariants
//!
//! - Checked-out connections never exceed `max_connections`
//! - Every checked-out connection is selected to the caller's database
//! - A loaded database with no keys is an empty index, never an absent one
//! - A scan from an older reload generation never publishes
//! - The index is eventually consistent: mutations do not update it
//!
//! ## Example
//!
//! ```rust
//! use keyscope_core::{EngineConfig, Explorer, PoolConfig};
//! use keyscope_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = InMemoryStore::new(4);
//! store.insert(0, "User:1", "alice");
//! store.insert(0, "user:2", "bob");
//!
//! let explorer = Explorer::connect(
//!     PoolConfig::default(),
//!     EngineConfig::default(),
//!     Arc::new(store.connector()),
//! )
//! .await
//! .unwrap();
//!
//! let keys = explorer.search("USER:*").await.unwrap();
//! assert_eq!(keys, vec!["User:1", "user:2"]);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
mod config;
pub mod directory;
mod error;
mod explorer;
pub mod index;
mod pool;
pub mod query;

/// Number of a logical database, in `[0, database_count)`.
pub type DatabaseId = u32;

pub use batch::{BatchOutcome, BatchSummary};
pub use config::{EngineConfig, GlobSyntax, PoolConfig, MAX_POOL_SIZE};
pub use error::{CoreError, CoreResult};
pub use explorer::{DeleteReport, Explorer, ExplorerStatus};
pub use index::{IndexState, KeyIndex, KeyIndexCache, ReloadHandle, ReloadReport};
pub use pool::{ConnectionPool, PooledConnection};
pub use query::GlobPattern;
