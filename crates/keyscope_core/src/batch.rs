//! Concurrent get, delete and set over key sets.
//!
//! Fan-out is bounded: at most `max_in_flight` tasks run at once, and each
//! task holds one pooled connection while it runs. Failures are recorded per
//! key or per chunk instead of aborting the batch.

use crate::error::{CoreError, CoreResult};
use crate::pool::ConnectionPool;
use crate::DatabaseId;
use keyscope_store::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Result of deleting one chunk of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Position of the chunk in the batch.
    pub chunk: usize,
    /// Number of keys sent.
    pub keys: usize,
    /// Whether the `del` call succeeded.
    pub succeeded: bool,
    /// Keys the store reported as removed.
    pub deleted: u64,
    /// Wall time of the chunk, including waiting for a connection.
    pub elapsed: Duration,
    /// Error text for a failed chunk.
    pub error: Option<String>,
}

/// Totals over a list of [`BatchOutcome`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Number of chunks.
    pub chunks: usize,
    /// Number of failed chunks.
    pub failed: usize,
    /// Keys sent across all chunks.
    pub keys: usize,
    /// Keys removed across all chunks.
    pub deleted: u64,
    /// Slowest chunk.
    pub slowest: Duration,
}

impl BatchSummary {
    /// Totals `outcomes`.
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        outcomes.iter().fold(Self::default(), |mut summary, outcome| {
            summary.chunks += 1;
            summary.keys += outcome.keys;
            summary.deleted += outcome.deleted;
            summary.slowest = summary.slowest.max(outcome.elapsed);
            if !outcome.succeeded {
                summary.failed += 1;
            }
            summary
        })
    }
}

/// Fetches every key of `keys` from `db`.
///
/// Each key gets its own result: a missing key is
/// [`CoreError::KeyNotFound`], a list or other non-scalar value is
/// [`CoreError::ValueType`]. Values that are not UTF-8 are converted lossily.
pub async fn get_values(
    pool: &ConnectionPool,
    db: DatabaseId,
    keys: &[String],
    max_in_flight: usize,
) -> BTreeMap<String, CoreResult<String>> {
    let started = Instant::now();
    let results = run_bounded(keys.to_vec(), max_in_flight, |key| {
        let pool = pool.clone();
        async move { get_one(&pool, db, &key).await }
    })
    .await;

    let values: BTreeMap<_, _> = keys
        .iter()
        .zip(results)
        .map(|(key, result)| {
            let result = result.unwrap_or_else(|| {
                Err(CoreError::Task {
                    message: format!("fetch of {key} did not complete"),
                })
            });
            (key.clone(), result)
        })
        .collect();

    debug!(db, keys = values.len(), elapsed = ?started.elapsed(), "batch.get_values");
    values
}

async fn get_one(pool: &ConnectionPool, db: DatabaseId, key: &str) -> CoreResult<String> {
    let mut conn = pool.acquire(db).await?;
    match conn.get(key).await {
        Ok(Some(bytes)) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Ok(None) => Err(CoreError::KeyNotFound {
            key: key.to_string(),
        }),
        Err(StoreError::WrongType) => Err(CoreError::ValueType {
            key: key.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Deletes `keys` from `db` in chunks of `chunk_size`, one `del` per chunk.
///
/// Chunks run concurrently, at most `max_in_flight` at once. The outcomes are
/// returned in chunk order once every chunk has finished.
pub async fn delete_keys(
    pool: &ConnectionPool,
    db: DatabaseId,
    keys: &[String],
    chunk_size: usize,
    max_in_flight: usize,
) -> Vec<BatchOutcome> {
    let chunks: Vec<Vec<String>> = keys
        .chunks(chunk_size.max(1))
        .map(<[String]>::to_vec)
        .collect();
    let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();

    let numbered: Vec<(usize, Vec<String>)> = chunks.into_iter().enumerate().collect();
    let results = run_bounded(numbered, max_in_flight, |(chunk, keys)| {
        let pool = pool.clone();
        async move { delete_chunk(&pool, db, chunk, keys).await }
    })
    .await;

    let outcomes: Vec<BatchOutcome> = results
        .into_iter()
        .zip(sizes)
        .enumerate()
        .map(|(chunk, (result, keys))| {
            result.unwrap_or_else(|| BatchOutcome {
                chunk,
                keys,
                succeeded: false,
                deleted: 0,
                elapsed: Duration::ZERO,
                error: Some("chunk task did not complete".into()),
            })
        })
        .collect();

    let summary = BatchSummary::from_outcomes(&outcomes);
    info!(
        db,
        chunks = summary.chunks,
        failed = summary.failed,
        deleted = summary.deleted,
        "batch.delete_keys"
    );
    outcomes
}

async fn delete_chunk(
    pool: &ConnectionPool,
    db: DatabaseId,
    chunk: usize,
    keys: Vec<String>,
) -> BatchOutcome {
    let started = Instant::now();
    let result = async {
        let mut conn = pool.acquire(db).await?;
        Ok::<_, CoreError>(conn.del(&keys).await?)
    }
    .await;
    let elapsed = started.elapsed();

    match result {
        Ok(deleted) => {
            debug!(db, chunk, keys = keys.len(), deleted, ?elapsed, "batch.chunk_deleted");
            BatchOutcome {
                chunk,
                keys: keys.len(),
                succeeded: true,
                deleted,
                elapsed,
                error: None,
            }
        }
        Err(e) => {
            warn!(db, chunk, keys = keys.len(), error = %e, "batch.chunk_failed");
            BatchOutcome {
                chunk,
                keys: keys.len(),
                succeeded: false,
                deleted: 0,
                elapsed,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Removes every key of `db`.
pub async fn flush_database(pool: &ConnectionPool, db: DatabaseId) -> CoreResult<()> {
    let mut conn = pool.acquire(db).await?;
    conn.flush_db().await?;
    info!(db, "batch.flushed");
    Ok(())
}

/// Stores `value` under `key` in `db`.
///
/// The key index is not updated; a new key becomes searchable after the next
/// reload.
pub async fn set_value(
    pool: &ConnectionPool,
    db: DatabaseId,
    key: &str,
    value: &str,
) -> CoreResult<()> {
    let mut conn = pool.acquire(db).await?;
    conn.set(key, value.as_bytes()).await?;
    debug!(db, key, "batch.set");
    Ok(())
}

/// Runs `task` over `items` with at most `max_in_flight` tasks alive.
///
/// The result vector is in input order; `None` marks a task that panicked.
async fn run_bounded<T, R, F, Fut>(items: Vec<T>, max_in_flight: usize, task: F) -> Vec<Option<R>>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(items.len()).collect();
    let mut pending = items.into_iter().enumerate();
    let mut tasks = JoinSet::new();
    let limit = max_in_flight.max(1);

    loop {
        while tasks.len() < limit {
            let Some((at, item)) = pending.next() else {
                break;
            };
            let run = task(item);
            tasks.spawn(async move { (at, run.await) });
        }
        match tasks.join_next().await {
            Some(Ok((at, result))) => results[at] = Some(result),
            Some(Err(e)) => warn!(error = %e, "batch.task_failed"),
            None => break,
        }
    }
    results
}
