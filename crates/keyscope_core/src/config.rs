//! Configuration for the pool and the query/batch engine.

use crate::error::{CoreError, CoreResult};
use keyscope_store::Endpoint;
use serde::Serialize;
use std::time::Duration;

/// Largest pool the tool accepts.
pub const MAX_POOL_SIZE: usize = 100;

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Dial target and credential.
    pub endpoint: Endpoint,
    /// Maximum connections checked out at once.
    pub max_connections: usize,
    /// Maximum idle connections kept for reuse.
    pub max_idle: usize,
    /// Dial attempts per acquisition before giving up.
    pub connect_attempts: u32,
}

impl PoolConfig {
    /// Creates a pool configuration for `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            max_connections: 10,
            max_idle: 10,
            connect_attempts: 3,
        }
    }

    /// Sets the maximum number of connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the maximum number of idle connections.
    pub fn with_max_idle(mut self, max: usize) -> Self {
        self.max_idle = max;
        self
    }

    /// Sets the number of dial attempts.
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.endpoint.host.trim().is_empty() {
            return Err(CoreError::invalid_config("host must not be empty"));
        }
        if self.endpoint.port == 0 {
            return Err(CoreError::invalid_config("port must not be 0"));
        }
        if !(1..=MAX_POOL_SIZE).contains(&self.max_connections) {
            return Err(CoreError::invalid_config(format!(
                "max_connections must be in 1..={MAX_POOL_SIZE}, got {}",
                self.max_connections
            )));
        }
        if self.connect_attempts == 0 {
            return Err(CoreError::invalid_config("connect_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}

/// How a glob pattern is turned into a matcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum GlobSyntax {
    /// Only `*` is special; every other character matches itself.
    #[default]
    Literal,
    /// `.` is escaped and `*` is a wildcard, but other regex metacharacters
    /// keep their regex meaning.
    Legacy,
}

impl std::str::FromStr for GlobSyntax {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "literal" => Ok(Self::Literal),
            "legacy" => Ok(Self::Legacy),
            other => Err(CoreError::invalid_config(format!(
                "unknown glob syntax {other:?} (expected literal or legacy)"
            ))),
        }
    }
}

/// Configuration for the index, query and batch engines.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Keys per `del` call.
    pub delete_chunk_size: usize,
    /// Maximum concurrent per-key or per-chunk tasks.
    pub max_in_flight: usize,
    /// How long a query waits for a loading index. `None` waits forever.
    pub ready_timeout: Option<Duration>,
    /// Pattern translation rules.
    pub glob_syntax: GlobSyntax,
    /// Match keys exactly as stored instead of ignoring case.
    pub case_sensitive: bool,
    /// Attempts at discovering the database count during initialization.
    pub init_attempts: u32,
}

impl EngineConfig {
    /// Creates the default engine configuration.
    pub fn new() -> Self {
        Self {
            delete_chunk_size: 1000,
            max_in_flight: 64,
            ready_timeout: None,
            glob_syntax: GlobSyntax::Literal,
            case_sensitive: false,
            init_attempts: 3,
        }
    }

    /// Sets the delete chunk size.
    pub fn with_delete_chunk_size(mut self, size: usize) -> Self {
        self.delete_chunk_size = size;
        self
    }

    /// Sets the fan-out bound.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Bounds how long queries wait for a loading index.
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Sets the glob syntax.
    pub fn with_glob_syntax(mut self, syntax: GlobSyntax) -> Self {
        self.glob_syntax = syntax;
        self
    }

    /// Sets case-sensitive matching.
    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Sets the number of initialization attempts.
    pub fn with_init_attempts(mut self, attempts: u32) -> Self {
        self.init_attempts = attempts;
        self
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.delete_chunk_size == 0 {
            return Err(CoreError::invalid_config("delete_chunk_size must be at least 1"));
        }
        if self.max_in_flight == 0 {
            return Err(CoreError::invalid_config("max_in_flight must be at least 1"));
        }
        if self.init_attempts == 0 {
            return Err(CoreError::invalid_config("init_attempts must be at least 1"));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
