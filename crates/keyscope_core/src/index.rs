//! Per-database key index cache.
//!
//! Every database gets one snapshot of its keyspace, grouped by lower-cased
//! key. Snapshots are produced by background scan tasks, one per database, and
//! replaced wholesale on reload.
//!
//! ## States
//!
//! Each database is [`IndexState::NotLoaded`], [`IndexState::Loading`] or
//! [`IndexState::Ready`]. An empty database is `Ready` with an empty index;
//! a failed scan goes back to `NotLoaded`.
//!
//! ## Generations
//!
//! Every [`KeyIndexCache::invalidate`] bumps a generation counter. A scan
//! started under an older generation cannot publish its result, so an
//! invalidated cache never reports stale keys as loaded.

use crate::error::{CoreError, CoreResult};
use crate::pool::ConnectionPool;
use crate::DatabaseId;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// All keys of one database sharing a lower-cased form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// The lower-cased key.
    pub lower: String,
    /// Original-case keys, sorted and distinct.
    pub variants: Vec<String>,
}

/// Immutable snapshot of one database's keyspace.
///
/// # Invariants
///
/// - Entries are sorted by `lower` and `lower` is unique
/// - Every variant lower-cases to its entry's `lower`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyIndex {
    entries: Vec<IndexEntry>,
    key_count: usize,
}

impl KeyIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Groups `keys` by their lower-cased form. Duplicates are collapsed.
    pub fn from_keys<I>(keys: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut grouped: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for key in keys {
            grouped.entry(key.to_lowercase()).or_default().insert(key);
        }

        let mut key_count = 0;
        let entries = grouped
            .into_iter()
            .map(|(lower, variants)| {
                key_count += variants.len();
                IndexEntry {
                    lower,
                    variants: variants.into_iter().collect(),
                }
            })
            .collect();

        Self { entries, key_count }
    }

    /// Returns the number of distinct lower-cased keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the database had no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of original-case keys.
    pub fn key_count(&self) -> usize {
        self.key_count
    }

    /// Returns the entries, sorted by lower-cased key.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Returns the original-case keys for a lower-cased key.
    pub fn variants(&self, lower: &str) -> Option<&[String]> {
        self.entries
            .binary_search_by(|entry| entry.lower.as_str().cmp(lower))
            .ok()
            .map(|at| self.entries[at].variants.as_slice())
    }
}

/// Load state of one database's index.
#[derive(Debug, Clone)]
pub enum IndexState {
    /// No scan has published a snapshot.
    NotLoaded,
    /// A scan is running.
    Loading,
    /// The snapshot is available.
    Ready(Arc<KeyIndex>),
}

impl IndexState {
    /// Returns true for [`IndexState::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, IndexState::Ready(_))
    }
}

#[derive(Debug, Default)]
struct CacheInner {
    generation: u64,
    states: HashMap<DatabaseId, IndexState>,
}

/// Concurrent map from database to [`IndexState`].
///
/// Written once per database per reload, read by every query. Readers that
/// need a snapshot which is not ready yet wait on a change notification
/// instead of polling.
#[derive(Debug)]
pub struct KeyIndexCache {
    inner: RwLock<CacheInner>,
    changes: watch::Sender<u64>,
}

impl Default for KeyIndexCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyIndexCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: RwLock::new(CacheInner::default()),
            changes,
        }
    }

    /// Returns the state of `db`.
    pub fn state(&self, db: DatabaseId) -> IndexState {
        self.inner
            .read()
            .states
            .get(&db)
            .cloned()
            .unwrap_or(IndexState::NotLoaded)
    }

    /// Returns the snapshot of `db` if it is ready.
    pub fn snapshot(&self, db: DatabaseId) -> Option<Arc<KeyIndex>> {
        match self.state(db) {
            IndexState::Ready(index) => Some(index),
            _ => None,
        }
    }

    /// Returns the number of indexed keys of `db` if it is ready.
    pub fn loaded_key_count(&self, db: DatabaseId) -> Option<usize> {
        self.snapshot(db).map(|index| index.key_count())
    }

    /// Returns the current generation.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Removes every entry and starts a new generation.
    pub fn invalidate(&self) -> u64 {
        let generation = {
            let mut inner = self.inner.write();
            inner.states.clear();
            inner.generation += 1;
            inner.generation
        };
        self.notify();
        generation
    }

    /// Invalidates and marks `dbs` as loading, atomically.
    fn begin_reload(&self, dbs: impl Iterator<Item = DatabaseId>) -> u64 {
        let generation = {
            let mut inner = self.inner.write();
            inner.states.clear();
            inner.generation += 1;
            inner
                .states
                .extend(dbs.map(|db| (db, IndexState::Loading)));
            inner.generation
        };
        self.notify();
        generation
    }

    /// Publishes a snapshot for `db` if `generation` is still current.
    ///
    /// Returns false when the result was discarded as stale.
    pub fn publish(&self, generation: u64, db: DatabaseId, index: KeyIndex) -> bool {
        {
            let mut inner = self.inner.write();
            if inner.generation != generation {
                return false;
            }
            inner.states.insert(db, IndexState::Ready(Arc::new(index)));
        }
        self.notify();
        true
    }

    /// Marks `db` as not loaded after a failed scan, if `generation` is current.
    pub fn abandon(&self, generation: u64, db: DatabaseId) {
        {
            let mut inner = self.inner.write();
            if inner.generation != generation {
                return;
            }
            inner.states.remove(&db);
        }
        self.notify();
    }

    /// Waits until `db` is ready and returns its snapshot.
    ///
    /// A one-time notice is logged when the caller has to wait. With
    /// `timeout == None` the wait is unbounded; a database whose scan failed
    /// stays not loaded until the next reload.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotReady`] when `timeout` elapses first.
    pub async fn wait_ready(
        &self,
        db: DatabaseId,
        timeout: Option<Duration>,
    ) -> CoreResult<Arc<KeyIndex>> {
        // Subscribe before the first check so no publish can slip in between.
        let mut changes = self.changes.subscribe();
        if let Some(index) = self.snapshot(db) {
            return Ok(index);
        }
        info!(db, "Loading key index for database {db}, please wait...");

        let started = Instant::now();
        let wait = async {
            loop {
                if changes.changed().await.is_err() {
                    return Err(CoreError::Task {
                        message: "key index cache dropped".into(),
                    });
                }
                if let Some(index) = self.snapshot(db) {
                    return Ok(index);
                }
            }
        };

        match timeout {
            None => wait.await,
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::NotReady {
                    db,
                    waited: started.elapsed(),
                }),
            },
        }
    }

    fn notify(&self) {
        self.changes
            .send_modify(|version| *version = version.wrapping_add(1));
    }
}

/// Summary of one finished reload.
#[derive(Debug, Clone, Default)]
pub struct ReloadReport {
    /// Cache generation the reload ran under.
    pub generation: u64,
    /// Databases whose snapshot was published.
    pub loaded: Vec<DatabaseId>,
    /// Databases whose scan failed, with the error.
    pub failed: Vec<(DatabaseId, String)>,
    /// Databases whose result was discarded by a newer reload.
    pub superseded: Vec<DatabaseId>,
    /// Original-case keys indexed across all loaded databases.
    pub keys_indexed: usize,
    /// Time from trigger until the last scan finished.
    pub elapsed: Duration,
}

#[derive(Debug)]
enum ScanOutcome {
    Loaded { db: DatabaseId, keys: usize },
    Superseded { db: DatabaseId },
    Failed { db: DatabaseId, error: String },
}

/// Handle to the scan tasks of one reload.
///
/// Dropping the handle does not cancel the scans.
#[derive(Debug)]
pub struct ReloadHandle {
    generation: u64,
    started: Instant,
    scans: Vec<JoinHandle<ScanOutcome>>,
}

impl ReloadHandle {
    /// Returns the cache generation of this reload.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Waits for every scan and summarizes them.
    pub async fn wait(self) -> ReloadReport {
        let mut report = ReloadReport {
            generation: self.generation,
            ..ReloadReport::default()
        };
        for scan in self.scans {
            match scan.await {
                Ok(ScanOutcome::Loaded { db, keys }) => {
                    report.loaded.push(db);
                    report.keys_indexed += keys;
                }
                Ok(ScanOutcome::Superseded { db }) => report.superseded.push(db),
                Ok(ScanOutcome::Failed { db, error }) => report.failed.push((db, error)),
                Err(e) => warn!(error = %e, "index.scan_task_failed"),
            }
        }
        report.loaded.sort_unstable();
        report.elapsed = self.started.elapsed();
        report
    }
}

/// Invalidates `cache` and starts one background scan per database in `0..db_count`.
///
/// Returns immediately. Each scan acquires a connection, lists every key with
/// `keys("*")`, groups the keys by lower-cased form and publishes the
/// snapshot. A failed scan is logged and leaves its database not loaded.
pub fn trigger_reload(
    cache: &Arc<KeyIndexCache>,
    pool: &ConnectionPool,
    db_count: u32,
) -> ReloadHandle {
    let generation = cache.begin_reload(0..db_count);
    info!(generation, databases = db_count, "index.reload_started");

    let scans = (0..db_count)
        .map(|db| {
            let cache = Arc::clone(cache);
            let pool = pool.clone();
            tokio::spawn(async move {
                match scan_database(&pool, db).await {
                    Ok(index) => {
                        let keys = index.key_count();
                        if cache.publish(generation, db, index) {
                            debug!(db, keys, generation, "index.scan_published");
                            ScanOutcome::Loaded { db, keys }
                        } else {
                            debug!(db, generation, "index.scan_superseded");
                            ScanOutcome::Superseded { db }
                        }
                    }
                    Err(e) => {
                        warn!(db, error = %e, "index.scan_failed");
                        cache.abandon(generation, db);
                        ScanOutcome::Failed {
                            db,
                            error: e.to_string(),
                        }
                    }
                }
            })
        })
        .collect();

    ReloadHandle {
        generation,
        started: Instant::now(),
        scans,
    }
}

async fn scan_database(pool: &ConnectionPool, db: DatabaseId) -> CoreResult<KeyIndex> {
    let keys = {
        let mut conn = pool.acquire(db).await?;
        conn.keys("*").await?
    };
    if keys.is_empty() {
        return Ok(KeyIndex::new());
    }
    Ok(tokio::task::spawn_blocking(move || KeyIndex::from_keys(keys)).await?)
}
