//! The explorer session.
//!
//! An [`Explorer`] owns the connection pool, the key index cache, the
//! discovered database count and the active database. Every operation runs
//! against the active database; switching it takes `&mut self`.

use crate::batch::{self, BatchOutcome};
use crate::config::{EngineConfig, PoolConfig};
use crate::directory;
use crate::error::{CoreError, CoreResult};
use crate::index::{self, IndexState, KeyIndexCache, ReloadHandle, ReloadReport};
use crate::pool::ConnectionPool;
use crate::query;
use crate::DatabaseId;
use keyscope_store::Connector;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// What [`Explorer::delete_matching`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteReport {
    /// The pattern selected everything and the operator confirmed; the
    /// database was flushed.
    Flushed,
    /// The pattern selected everything and the operator declined.
    Cancelled,
    /// The matched keys were deleted in chunks.
    Deleted(Vec<BatchOutcome>),
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, Serialize)]
pub struct ExplorerStatus {
    /// Endpoint address.
    pub address: String,
    /// The active database.
    pub database: DatabaseId,
    /// Number of logical databases.
    pub database_count: u32,
    /// Pool bound.
    pub max_connections: usize,
    /// Connections checked out.
    pub in_use: usize,
    /// Connections idle in the pool.
    pub idle: usize,
    /// Databases whose index is ready.
    pub indexed_databases: usize,
    /// Indexed keys of the active database, if ready.
    pub indexed_keys: Option<usize>,
}

/// Session over one store endpoint.
pub struct Explorer {
    pool: ConnectionPool,
    cache: Arc<KeyIndexCache>,
    engine: EngineConfig,
    db: DatabaseId,
    database_count: u32,
    reload: Option<ReloadHandle>,
}

impl Explorer {
    /// Connects, discovers the database count and starts indexing every
    /// database in the background.
    ///
    /// Discovery is attempted `engine.init_attempts` times.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for invalid configuration, or the
    /// last discovery error if every attempt failed.
    pub async fn connect(
        pool_config: PoolConfig,
        engine: EngineConfig,
        connector: Arc<dyn Connector>,
    ) -> CoreResult<Self> {
        engine.validate()?;
        let pool = ConnectionPool::new(pool_config, connector)?;
        let mut explorer = Self {
            pool,
            cache: Arc::new(KeyIndexCache::new()),
            engine,
            db: 0,
            database_count: 0,
            reload: None,
        };
        explorer.initialize().await?;
        Ok(explorer)
    }

    async fn initialize(&mut self) -> CoreResult<()> {
        let attempts = self.engine.init_attempts;
        let mut last_error = None;
        for attempt in 1..=attempts {
            match directory::discover_database_count(&self.pool).await {
                Ok(count) => {
                    self.database_count = count;
                    if self.db >= count {
                        self.db = 0;
                    }
                    info!(
                        address = %self.pool.config().endpoint.address(),
                        databases = count,
                        "explorer.initialized"
                    );
                    self.reload_index();
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "explorer.init_failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| CoreError::invalid_config("init_attempts must be at least 1")))
    }

    /// Returns the active database.
    pub fn current_database(&self) -> DatabaseId {
        self.db
    }

    /// Returns the number of logical databases.
    pub fn database_count(&self) -> u32 {
        self.database_count
    }

    /// Returns the engine configuration.
    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// Returns the pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Returns the index state of `db`.
    pub fn index_state(&self, db: DatabaseId) -> IndexState {
        self.cache.state(db)
    }

    /// Returns the indexed key count of `db`, if its index is ready.
    pub fn indexed_key_count(&self, db: DatabaseId) -> Option<usize> {
        self.cache.loaded_key_count(db)
    }

    /// Clears the key index and rescans every database in the background.
    ///
    /// Returns immediately; queries wait for the affected database.
    pub fn reload_index(&mut self) {
        self.reload = Some(index::trigger_reload(
            &self.cache,
            &self.pool,
            self.database_count,
        ));
    }

    /// Waits for the most recent reload to finish.
    ///
    /// Returns `None` if it was already awaited.
    pub async fn wait_for_reload(&mut self) -> Option<ReloadReport> {
        let handle = self.reload.take()?;
        let report = handle.wait().await;
        info!(
            generation = report.generation,
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            keys = report.keys_indexed,
            elapsed = ?report.elapsed,
            "explorer.reload_finished"
        );
        Some(report)
    }

    /// Returns every key of the active database matching `pattern`, sorted.
    pub async fn search(&self, pattern: &str) -> CoreResult<Vec<String>> {
        query::search(&self.cache, self.db, pattern, &self.engine).await
    }

    /// Fetches `keys` from the active database.
    pub async fn get_values(&self, keys: &[String]) -> BTreeMap<String, CoreResult<String>> {
        batch::get_values(&self.pool, self.db, keys, self.engine.max_in_flight).await
    }

    /// Searches `pattern` and fetches every match.
    pub async fn get_matching(
        &self,
        pattern: &str,
    ) -> CoreResult<BTreeMap<String, CoreResult<String>>> {
        let keys = self.search(pattern).await?;
        Ok(self.get_values(&keys).await)
    }

    /// Deletes `keys` from the active database in chunks.
    pub async fn delete_keys(&self, keys: &[String]) -> Vec<BatchOutcome> {
        batch::delete_keys(
            &self.pool,
            self.db,
            keys,
            self.engine.delete_chunk_size,
            self.engine.max_in_flight,
        )
        .await
    }

    /// Deletes every key of the active database matching `pattern`.
    ///
    /// For `*` or a blank pattern, `confirm` is asked with a description of
    /// the consequence; on `true` the database is flushed in one call, on
    /// `false` nothing changes.
    /// Other patterns are searched and deleted without confirmation.
    pub async fn delete_matching<F>(&self, pattern: &str, confirm: F) -> CoreResult<DeleteReport>
    where
        F: FnOnce(&str) -> bool,
    {
        if query::is_match_all(pattern) {
            let prompt = format!("This removes every key of database {}. Continue?", self.db);
            if !confirm(&prompt) {
                info!(db = self.db, "explorer.flush_cancelled");
                return Ok(DeleteReport::Cancelled);
            }
            batch::flush_database(&self.pool, self.db).await?;
            return Ok(DeleteReport::Flushed);
        }

        let keys = self.search(pattern).await?;
        Ok(DeleteReport::Deleted(self.delete_keys(&keys).await))
    }

    /// Stores `value` under `key` in the active database.
    ///
    /// The key index is not updated.
    pub async fn set_value(&self, key: &str, value: &str) -> CoreResult<()> {
        batch::set_value(&self.pool, self.db, key, value).await
    }

    /// Makes `db` the active database.
    ///
    /// The pool is left alone: every checkout selects its database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidDatabase`] if `db` is out of range; the
    /// active database is unchanged.
    pub fn switch_database(&mut self, db: DatabaseId) -> CoreResult<()> {
        if db >= self.database_count {
            return Err(CoreError::InvalidDatabase {
                db,
                count: self.database_count,
            });
        }
        if db == self.db {
            return Ok(());
        }
        self.db = db;
        info!(db, "explorer.database_switched");
        Ok(())
    }

    /// Applies a new pool configuration, rediscovers the database count and
    /// reindexes.
    pub async fn reconfigure(&mut self, config: PoolConfig) -> CoreResult<()> {
        self.pool.rebuild(config)?;
        self.cache.invalidate();
        self.initialize().await
    }

    /// Returns the live size of the first `limit` databases, or all of them.
    pub async fn list_sizes(&self, limit: Option<u32>) -> BTreeMap<DatabaseId, u64> {
        let count = limit.map_or(self.database_count, |n| n.min(self.database_count));
        directory::list_sizes(&self.pool, count).await
    }

    /// Returns a snapshot of the session.
    pub fn status(&self) -> ExplorerStatus {
        let config = self.pool.config();
        ExplorerStatus {
            address: config.endpoint.address(),
            database: self.db,
            database_count: self.database_count,
            max_connections: config.max_connections,
            in_use: self.pool.in_use(),
            idle: self.pool.idle(),
            indexed_databases: (0..self.database_count)
                .filter(|db| self.cache.state(*db).is_ready())
                .count(),
            indexed_keys: self.cache.loaded_key_count(self.db),
        }
    }
}

impl std::fmt::Debug for Explorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Explorer")
            .field("pool", &self.pool)
            .field("db", &self.db)
            .field("database_count", &self.database_count)
            .finish_non_exhaustive()
    }
}
