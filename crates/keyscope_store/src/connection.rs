//! Store client trait definitions.

use crate::endpoint::Endpoint;
use crate::error::StoreResult;
use async_trait::async_trait;

/// Dials and authenticates new connections.
///
/// A connector carries no per-connection state; the pool calls
/// [`Connector::connect`] whenever it needs a fresh connection and passes the
/// endpoint it is currently configured with.
///
/// # Implementors
///
/// - [`super::InMemoryConnector`] - For testing
/// - [`super::TcpConnector`] - RESP over TCP
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new authenticated connection selected to database 0.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The endpoint cannot be reached within its connect timeout
    /// - The credential is rejected
    async fn connect(&self, endpoint: &Endpoint) -> StoreResult<Box<dyn Connection>>;
}

/// A single command channel to the store.
///
/// # Invariants
///
/// - Exactly one logical database is selected at a time
/// - `select` changes the database for every later command on this connection
/// - A connection that returned an error with
///   [`StoreError::is_connection_error`](crate::StoreError::is_connection_error)
///   must be discarded
#[async_trait]
pub trait Connection: Send {
    /// Selects the logical database for subsequent commands.
    async fn select(&mut self, db: u32) -> StoreResult<()>;

    /// Returns every key in the selected database matching a glob pattern.
    ///
    /// The match is case-sensitive and scans the whole keyspace.
    async fn keys(&mut self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Returns the value stored at `key`, or `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WrongType`](crate::StoreError::WrongType) when the
    /// key holds a value that is not a plain scalar.
    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` at `key`, replacing any previous value.
    async fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Deletes the given keys, returning how many existed.
    async fn del(&mut self, keys: &[String]) -> StoreResult<u64>;

    /// Returns the number of keys in the selected database.
    async fn dbsize(&mut self) -> StoreResult<u64>;

    /// Returns a server configuration parameter as the raw reply items.
    ///
    /// A well-formed reply is a `[name, value]` pair; interpreting it is left
    /// to the caller.
    async fn config_get(&mut self, name: &str) -> StoreResult<Vec<String>>;

    /// Removes every key from the selected database.
    async fn flush_db(&mut self) -> StoreResult<()>;
}
