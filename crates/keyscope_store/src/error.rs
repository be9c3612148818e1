//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent bytes that violate the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server replied with an error.
    #[error("server error: {0}")]
    Server(String),

    /// The key holds a value that is not a plain scalar.
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,

    /// Dialing or a command did not finish in time.
    #[error("operation timed out")]
    Timeout,

    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,

    /// The requested logical database does not exist.
    #[error("database {db} out of range (store has {count})")]
    InvalidDatabase {
        /// The requested database.
        db: u32,
        /// The number of databases the store exposes.
        count: u32,
    },
}

impl StoreError {
    /// Returns true if the connection that produced this error must not be reused.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_) | StoreError::Protocol(_) | StoreError::Timeout | StoreError::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_flagged() {
        assert!(StoreError::Timeout.is_connection_error());
        assert!(StoreError::Closed.is_connection_error());
        assert!(StoreError::Protocol("bad frame".into()).is_connection_error());
        assert!(!StoreError::WrongType.is_connection_error());
        assert!(!StoreError::Server("ERR unknown".into()).is_connection_error());
    }

    #[test]
    fn error_display() {
        let err = StoreError::InvalidDatabase { db: 20, count: 16 };
        assert_eq!(err.to_string(), "database 20 out of range (store has 16)");
    }
}
