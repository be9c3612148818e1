//! Error types for Keyscope core.

use keyscope_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in Keyscope core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Dialing or authenticating failed after all attempts.
    #[error("connection failed after {attempts} attempt(s): {source}")]
    Connection {
        /// How many dials were tried.
        attempts: u32,
        /// The last dial error.
        #[source]
        source: StoreError,
    },

    /// An administrative reply had an unexpected shape.
    #[error("unexpected reply to {query}: {message}")]
    ConfigParse {
        /// The query that produced the reply.
        query: String,
        /// What was wrong with it.
        message: String,
    },

    /// The key does not exist.
    #[error("key not found: {key}")]
    KeyNotFound {
        /// The missing key.
        key: String,
    },

    /// The key holds a value that is not a plain scalar.
    #[error("value of {key} is not a plain scalar")]
    ValueType {
        /// The offending key.
        key: String,
    },

    /// No pool slot became free in time.
    #[error("connection pool exhausted ({max} connection(s) in use)")]
    PoolExhausted {
        /// The configured pool size.
        max: usize,
    },

    /// The key index for a database did not become ready in time.
    #[error("key index for database {db} not ready after {waited:?}")]
    NotReady {
        /// The database that was queried.
        db: u32,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The database number is outside `[0, count)`.
    #[error("database {db} out of range [0, {count})")]
    InvalidDatabase {
        /// The requested database.
        db: u32,
        /// The number of databases.
        count: u32,
    },

    /// The pattern could not be compiled into a matcher.
    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern {
        /// The pattern as given.
        pattern: String,
        /// Why it was rejected.
        message: String,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },

    /// A store command failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A spawned task panicked or was cancelled.
    #[error("task failed: {message}")]
    Task {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a config parse error.
    pub fn config_parse(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigParse {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates an invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Returns true for dial or authentication failures.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, CoreError::Connection { .. })
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_keeps_source() {
        let err = CoreError::Connection {
            attempts: 3,
            source: StoreError::Auth("WRONGPASS".into()),
        };
        assert!(err.is_connection_error());
        assert!(err.to_string().contains("3 attempt"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn error_display() {
        let err = CoreError::InvalidDatabase { db: 16, count: 16 };
        assert_eq!(err.to_string(), "database 16 out of range [0, 16)");

        let err = CoreError::config_parse("CONFIG GET databases", "missing value");
        assert!(err.to_string().contains("CONFIG GET databases"));
        assert!(!err.is_connection_error());
    }
}
