//! Bounded pool of store connections.
//!
//! The pool hands out [`PooledConnection`] guards. Holding a guard holds one
//! semaphore permit, so no more than `max_connections` guards exist at once.
//! The semaphore lives as long as the pool: a rebuild resizes it instead of
//! replacing it, so guards checked out before the rebuild still count against
//! the bound. Dropping the guard returns the connection to the idle list
//! unless it was marked broken or the pool was rebuilt meanwhile.

use crate::config::PoolConfig;
use crate::error::{CoreError, CoreResult};
use keyscope_store::{Connection, Connector, StoreResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct PoolState {
    config: PoolConfig,
    idle: Vec<Box<dyn Connection>>,
    generation: u64,
    /// Permits still to retire after a shrink.
    debt: usize,
}

impl PoolState {
    /// Retires free permits until the debt is paid or none are left.
    fn absorb_debt(&mut self, semaphore: &Semaphore) {
        while self.debt > 0 {
            match semaphore.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    self.debt -= 1;
                }
                Err(_) => break,
            }
        }
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
}

/// A bounded, lazily-filled pool of authenticated connections.
///
/// Cloning is cheap; clones share the same connections and bound.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

#[derive(Clone, Copy)]
enum Wait {
    Forever,
    Never,
    Until(Instant),
}

impl ConnectionPool {
    /// Creates a pool. No connection is dialed until the first acquisition.
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> CoreResult<Self> {
        config.validate()?;
        let semaphore = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            shared: Arc::new(Shared {
                connector,
                semaphore,
                state: Mutex::new(PoolState {
                    config,
                    idle: Vec::new(),
                    generation: 0,
                    debt: 0,
                }),
            }),
        })
    }

    /// Waits for a free slot and returns a connection selected to `db`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Connection`] if dialing fails on every attempt, or
    /// [`CoreError::Store`] if `select` is rejected.
    pub async fn acquire(&self, db: u32) -> CoreResult<PooledConnection> {
        self.checkout(db, Wait::Forever).await
    }

    /// Like [`acquire`](Self::acquire), but fails with
    /// [`CoreError::PoolExhausted`] instead of waiting.
    pub async fn try_acquire(&self, db: u32) -> CoreResult<PooledConnection> {
        self.checkout(db, Wait::Never).await
    }

    /// Like [`acquire`](Self::acquire), but waits for a slot at most `wait`.
    pub async fn acquire_timeout(&self, db: u32, wait: Duration) -> CoreResult<PooledConnection> {
        self.checkout(db, Wait::Until(Instant::now() + wait)).await
    }

    /// Drops idle connections and applies a new configuration.
    ///
    /// Guards already checked out stay valid, count against the new bound
    /// and are discarded on release. Shrinking retires permits as they come
    /// back, so new checkouts wait until fewer than the new maximum are out.
    pub fn rebuild(&self, config: PoolConfig) -> CoreResult<()> {
        config.validate()?;
        let semaphore = &self.shared.semaphore;
        let mut state = self.shared.state.lock();

        let old_max = state.config.max_connections;
        let new_max = config.max_connections;
        if new_max >= old_max {
            let grow = new_max - old_max;
            let repaid = grow.min(state.debt);
            state.debt -= repaid;
            semaphore.add_permits(grow - repaid);
        } else {
            state.debt += old_max - new_max;
            state.absorb_debt(semaphore);
        }

        let dropped = state.idle.len();
        state.idle.clear();
        state.generation += 1;
        info!(
            address = %config.endpoint.address(),
            max_connections = new_max,
            dropped_idle = dropped,
            pending_shrink = state.debt,
            generation = state.generation,
            "pool.rebuilt"
        );
        state.config = config;
        Ok(())
    }

    /// Returns a copy of the current configuration.
    pub fn config(&self) -> PoolConfig {
        self.shared.state.lock().config.clone()
    }

    /// Returns the configured maximum.
    pub fn max_connections(&self) -> usize {
        self.shared.state.lock().config.max_connections
    }

    /// Returns how many slots are checked out, across generations.
    pub fn in_use(&self) -> usize {
        let state = self.shared.state.lock();
        (state.config.max_connections + state.debt)
            .saturating_sub(self.shared.semaphore.available_permits())
    }

    /// Returns how many connections wait in the idle list.
    pub fn idle(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    async fn checkout(&self, db: u32, wait: Wait) -> CoreResult<PooledConnection> {
        let permit = self.permit(wait).await?;

        let (reused, generation) = {
            let mut state = self.shared.state.lock();
            (state.idle.pop(), state.generation)
        };
        let conn = match reused {
            Some(conn) => conn,
            None => self.dial().await?,
        };

        let mut guard = PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            generation,
            db,
            broken: false,
            permit: Some(permit),
        };
        guard.select(db).await?;
        Ok(guard)
    }

    async fn permit(&self, wait: Wait) -> CoreResult<OwnedSemaphorePermit> {
        loop {
            let semaphore = Arc::clone(&self.shared.semaphore);
            let max = self.max_connections();
            let permit = match wait {
                Wait::Forever => semaphore.acquire_owned().await.map_err(|_| closed())?,
                Wait::Never => match semaphore.try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(TryAcquireError::NoPermits) => {
                        return Err(CoreError::PoolExhausted { max })
                    }
                    Err(TryAcquireError::Closed) => return Err(closed()),
                },
                Wait::Until(deadline) => {
                    match tokio::time::timeout_at(deadline, semaphore.acquire_owned()).await {
                        Ok(result) => result.map_err(|_| closed())?,
                        Err(_) => return Err(CoreError::PoolExhausted { max }),
                    }
                }
            };

            // A permit freed outside a guard may still owe a pending shrink.
            let owed = {
                let mut state = self.shared.state.lock();
                let owed = state.debt > 0;
                if owed {
                    state.debt -= 1;
                }
                owed
            };
            if !owed {
                return Ok(permit);
            }
            permit.forget();
        }
    }

    async fn dial(&self) -> CoreResult<Box<dyn Connection>> {
        let (endpoint, attempts) = {
            let state = self.shared.state.lock();
            (state.config.endpoint.clone(), state.config.connect_attempts)
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.shared.connector.connect(&endpoint).await {
                Ok(conn) => {
                    debug!(address = %endpoint.address(), attempt, "pool.dialed");
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(address = %endpoint.address(), attempt, error = %e, "pool.dial_failed");
                    last_error = Some(e);
                }
            }
        }

        Err(CoreError::Connection {
            attempts,
            source: last_error.unwrap_or(keyscope_store::StoreError::Closed),
        })
    }
}

// The pool never closes its semaphore.
fn closed() -> CoreError {
    CoreError::Task {
        message: "pool semaphore closed".to_string(),
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ConnectionPool")
            .field("address", &state.config.endpoint.address())
            .field("max_connections", &state.config.max_connections)
            .field("idle", &state.idle.len())
            .field("generation", &state.generation)
            .finish()
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Commands go through the guard so that connection-level failures, and
/// commands abandoned mid-flight, keep the connection out of the idle list.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    shared: Arc<Shared>,
    generation: u64,
    db: u32,
    broken: bool,
    permit: Option<OwnedSemaphorePermit>,
}

macro_rules! forward {
    ($self:ident, $call:ident($($arg:expr),*)) => {{
        let Some(conn) = $self.conn.as_mut() else {
            return Err(keyscope_store::StoreError::Closed);
        };
        // Stays set if the future is dropped before the reply arrives.
        $self.broken = true;
        let result = conn.$call($($arg),*).await;
        $self.broken = matches!(&result, Err(e) if e.is_connection_error());
        result
    }};
}

impl PooledConnection {
    /// Returns the database this connection is selected to.
    pub fn db(&self) -> u32 {
        self.db
    }

    /// Prevents the connection from returning to the idle list.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Selects `db`.
    pub async fn select(&mut self, db: u32) -> StoreResult<()> {
        forward!(self, select(db))?;
        self.db = db;
        Ok(())
    }

    /// Runs `keys(pattern)`.
    pub async fn keys(&mut self, pattern: &str) -> StoreResult<Vec<String>> {
        forward!(self, keys(pattern))
    }

    /// Runs `get(key)`.
    pub async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        forward!(self, get(key))
    }

    /// Runs `set(key, value)`.
    pub async fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        forward!(self, set(key, value))
    }

    /// Runs `del(keys...)`.
    pub async fn del(&mut self, keys: &[String]) -> StoreResult<u64> {
        forward!(self, del(keys))
    }

    /// Runs `dbsize()`.
    pub async fn dbsize(&mut self) -> StoreResult<u64> {
        forward!(self, dbsize())
    }

    /// Runs `config_get(name)`.
    pub async fn config_get(&mut self, name: &str) -> StoreResult<Vec<String>> {
        forward!(self, config_get(name))
    }

    /// Runs `flush_db()`.
    pub async fn flush_db(&mut self) -> StoreResult<()> {
        forward!(self, flush_db())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if let Some(permit) = self.permit.take() {
            if state.debt > 0 {
                permit.forget();
                state.debt -= 1;
            }
        }

        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.broken {
            debug!(db = self.db, "pool.discarded");
            return;
        }
        if state.generation == self.generation && state.idle.len() < state.config.max_idle {
            state.idle.push(conn);
        }
    }
}
