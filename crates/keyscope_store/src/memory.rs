//! In-memory store for testing.

use crate::connection::{Connection, Connector};
use crate::endpoint::Endpoint;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A value held by the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredValue {
    /// A plain string value, readable with `get`.
    Scalar(Vec<u8>),
    /// A list value; `get` on it fails with [`StoreError::WrongType`].
    List(Vec<Vec<u8>>),
}

#[derive(Debug, Default)]
struct Faults {
    keys: HashSet<u32>,
    dbsize: HashSet<u32>,
}

#[derive(Debug)]
struct Inner {
    databases: RwLock<Vec<BTreeMap<String, StoredValue>>>,
    password: Option<String>,
    config: RwLock<HashMap<String, Vec<String>>>,
    faults: Mutex<Faults>,
    keys_delay: Mutex<Duration>,
    refuse_dials: AtomicBool,
    dials: AtomicU64,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    del_calls: AtomicU64,
    flush_calls: AtomicU64,
}

/// An in-memory key-value store with numbered databases.
///
/// This store is suitable for:
/// - Unit tests
/// - Integration tests of the pool, index and batch engines
///
/// Besides holding data it counts connections and commands, and can be told
/// to fail specific commands so error paths can be exercised.
///
/// # Thread Safety
///
/// Cloning is cheap; every clone shares the same data and counters.
///
/// # Example
///
/// ```rust
/// use keyscope_store::InMemoryStore;
///
/// let store = InMemoryStore::new(4);
/// store.insert(1, "user:1", "alice");
/// assert_eq!(store.len(1), 1);
/// assert_eq!(store.len(0), 0);
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    /// Creates a store exposing `databases` empty databases and no password.
    #[must_use]
    pub fn new(databases: u32) -> Self {
        Self::build(databases, None)
    }

    /// Creates a store that requires `password` on connect.
    #[must_use]
    pub fn with_password(databases: u32, password: impl Into<String>) -> Self {
        Self::build(databases, Some(password.into()))
    }

    fn build(databases: u32, password: Option<String>) -> Self {
        let mut config = HashMap::new();
        config.insert(
            "databases".to_string(),
            vec!["databases".to_string(), databases.to_string()],
        );
        Self {
            inner: Arc::new(Inner {
                databases: RwLock::new(vec![BTreeMap::new(); databases as usize]),
                password,
                config: RwLock::new(config),
                faults: Mutex::new(Faults::default()),
                keys_delay: Mutex::new(Duration::ZERO),
                refuse_dials: AtomicBool::new(false),
                dials: AtomicU64::new(0),
                live: AtomicUsize::new(0),
                peak_live: AtomicUsize::new(0),
                del_calls: AtomicU64::new(0),
                flush_calls: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a connector that opens connections to this store.
    #[must_use]
    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector {
            store: self.clone(),
        }
    }

    /// Returns the number of databases.
    pub fn database_count(&self) -> u32 {
        self.inner.databases.read().len() as u32
    }

    /// Stores a scalar value. Panics if `db` is out of range.
    pub fn insert(&self, db: u32, key: impl Into<String>, value: impl AsRef<[u8]>) {
        self.insert_value(db, key, StoredValue::Scalar(value.as_ref().to_vec()));
    }

    /// Stores an arbitrary value. Panics if `db` is out of range.
    pub fn insert_value(&self, db: u32, key: impl Into<String>, value: StoredValue) {
        self.inner.databases.write()[db as usize].insert(key.into(), value);
    }

    /// Removes `key` from `db`, returning true if it existed.
    pub fn remove(&self, db: u32, key: &str) -> bool {
        self.inner
            .databases
            .write()
            .get_mut(db as usize)
            .is_some_and(|keys| keys.remove(key).is_some())
    }

    /// Returns the number of keys in `db`.
    pub fn len(&self, db: u32) -> usize {
        self.inner
            .databases
            .read()
            .get(db as usize)
            .map_or(0, BTreeMap::len)
    }

    /// Returns true if `db` holds no keys.
    pub fn is_empty(&self, db: u32) -> bool {
        self.len(db) == 0
    }

    /// Returns every key in `db`, sorted.
    pub fn keys(&self, db: u32) -> Vec<String> {
        self.inner
            .databases
            .read()
            .get(db as usize)
            .map(|keys| keys.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Overrides the reply for `config_get(name)`.
    pub fn set_config_reply(&self, name: &str, reply: Vec<String>) {
        self.inner.config.write().insert(name.to_string(), reply);
    }

    /// Makes `keys` fail on `db` until cleared.
    pub fn fail_keys(&self, db: u32, fail: bool) {
        let mut faults = self.inner.faults.lock();
        if fail {
            faults.keys.insert(db);
        } else {
            faults.keys.remove(&db);
        }
    }

    /// Makes `dbsize` fail on `db` until cleared.
    pub fn fail_dbsize(&self, db: u32, fail: bool) {
        let mut faults = self.inner.faults.lock();
        if fail {
            faults.dbsize.insert(db);
        } else {
            faults.dbsize.remove(&db);
        }
    }

    /// Delays every `keys` reply by `delay`.
    pub fn set_keys_delay(&self, delay: Duration) {
        *self.inner.keys_delay.lock() = delay;
    }

    /// Makes every dial fail with a refused connection.
    pub fn refuse_dials(&self, refuse: bool) {
        self.inner.refuse_dials.store(refuse, Ordering::SeqCst);
    }

    /// Returns how many connections were dialed successfully.
    pub fn dial_count(&self) -> u64 {
        self.inner.dials.load(Ordering::SeqCst)
    }

    /// Returns how many connections are currently open.
    pub fn live_connections(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Returns the largest number of connections ever open at once.
    pub fn peak_connections(&self) -> usize {
        self.inner.peak_live.load(Ordering::SeqCst)
    }

    /// Returns how many `del` commands were executed.
    pub fn del_calls(&self) -> u64 {
        self.inner.del_calls.load(Ordering::SeqCst)
    }

    /// Returns how many `flush_db` commands were executed.
    pub fn flush_calls(&self) -> u64 {
        self.inner.flush_calls.load(Ordering::SeqCst)
    }
}

/// Connector for [`InMemoryStore`].
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    store: InMemoryStore,
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, endpoint: &Endpoint) -> StoreResult<Box<dyn Connection>> {
        let inner = &self.store.inner;
        if inner.refuse_dials.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused by {}", endpoint.address()),
            )));
        }
        if inner.password.is_some() && inner.password != endpoint.password {
            return Err(StoreError::Auth("invalid password".into()));
        }

        inner.dials.fetch_add(1, Ordering::SeqCst);
        let live = inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_live.fetch_max(live, Ordering::SeqCst);

        Ok(Box::new(InMemoryConnection {
            inner: Arc::clone(inner),
            db: 0,
        }))
    }
}

struct InMemoryConnection {
    inner: Arc<Inner>,
    db: u32,
}

impl InMemoryConnection {
    fn read<R>(&self, f: impl FnOnce(&BTreeMap<String, StoredValue>) -> R) -> R {
        let databases = self.inner.databases.read();
        f(&databases[self.db as usize])
    }

    fn write<R>(&self, f: impl FnOnce(&mut BTreeMap<String, StoredValue>) -> R) -> R {
        let mut databases = self.inner.databases.write();
        f(&mut databases[self.db as usize])
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn select(&mut self, db: u32) -> StoreResult<()> {
        let count = self.inner.databases.read().len() as u32;
        if db >= count {
            return Err(StoreError::InvalidDatabase { db, count });
        }
        self.db = db;
        Ok(())
    }

    async fn keys(&mut self, pattern: &str) -> StoreResult<Vec<String>> {
        let delay = *self.inner.keys_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.inner.faults.lock().keys.contains(&self.db) {
            return Err(StoreError::Server(format!(
                "ERR injected keys failure on db {}",
                self.db
            )));
        }
        Ok(self.read(|keys| {
            keys.keys()
                .filter(|key| glob_match(pattern.as_bytes(), key.as_bytes()))
                .cloned()
                .collect()
        }))
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.read(|keys| match keys.get(key) {
            None => Ok(None),
            Some(StoredValue::Scalar(value)) => Ok(Some(value.clone())),
            Some(StoredValue::List(_)) => Err(StoreError::WrongType),
        })
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.write(|keys| {
            keys.insert(key.to_string(), StoredValue::Scalar(value.to_vec()));
        });
        Ok(())
    }

    async fn del(&mut self, keys: &[String]) -> StoreResult<u64> {
        self.inner.del_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.write(|stored| {
            keys.iter()
                .filter(|key| stored.remove(key.as_str()).is_some())
                .count() as u64
        }))
    }

    async fn dbsize(&mut self) -> StoreResult<u64> {
        if self.inner.faults.lock().dbsize.contains(&self.db) {
            return Err(StoreError::Server(format!(
                "ERR injected dbsize failure on db {}",
                self.db
            )));
        }
        Ok(self.read(|keys| keys.len() as u64))
    }

    async fn config_get(&mut self, name: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .inner
            .config
            .read()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn flush_db(&mut self) -> StoreResult<()> {
        self.inner.flush_calls.fetch_add(1, Ordering::SeqCst);
        self.write(BTreeMap::clear);
        Ok(())
    }
}

/// Case-sensitive glob match supporting `*` and `?`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
