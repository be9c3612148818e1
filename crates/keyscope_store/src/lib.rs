//! # Keyscope Store
//!
//! Client-side access to a remote key-value store organized into numbered
//! logical databases.
//!
//! This crate provides the lowest-level abstraction used by Keyscope.
//! Connections are **thin command channels** - they do not cache, retry or
//! pool anything. Pooling, indexing and fan-out live in `keyscope_core`.
//!
//! ## Design Principles
//!
//! - A [`Connector`] dials and authenticates; a [`Connection`] runs commands
//! - Each connection has exactly one selected database at a time
//! - Connectors must be `Send + Sync` so a pool can share them across tasks
//! - Errors say whether the connection is still usable
//!
//! ## Available Implementations
//!
//! - [`InMemoryStore`] - For testing, with fault injection and counters
//! - [`TcpConnector`] - RESP over TCP for Redis-compatible servers
//!
//! ## Example
//!
//! ```rust
//! use keyscope_store::{Connector, Endpoint, InMemoryStore};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let store = InMemoryStore::new(16);
//! let mut conn = store.connector().connect(&Endpoint::default()).await.unwrap();
//! conn.set("greeting", b"hello").await.unwrap();
//! assert_eq!(conn.get("greeting").await.unwrap(), Some(b"hello".to_vec()));
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod endpoint;
mod error;
mod memory;
pub mod resp;
mod tcp;

pub use connection::{Connection, Connector};
pub use endpoint::Endpoint;
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryConnector, InMemoryStore, StoredValue};
pub use tcp::{TcpConnection, TcpConnector};
