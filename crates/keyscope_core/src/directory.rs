//! Discovery of logical databases and their sizes.

use crate::error::{CoreError, CoreResult};
use crate::pool::ConnectionPool;
use crate::DatabaseId;
use std::collections::BTreeMap;
use tokio::task::JoinSet;
use tracing::{debug, warn};

const DATABASES_PARAM: &str = "databases";

/// Asks the store how many logical databases it exposes.
///
/// Issues `config_get("databases")` on database 0. The reply must be a
/// `[name, value]` pair whose value is a positive integer.
///
/// # Errors
///
/// Returns [`CoreError::ConfigParse`] for any other reply shape, or the pool's
/// error if no connection could be acquired.
pub async fn discover_database_count(pool: &ConnectionPool) -> CoreResult<u32> {
    let mut conn = pool.acquire(0).await?;
    let reply = conn.config_get(DATABASES_PARAM).await?;
    parse_database_count(&reply)
}

fn parse_database_count(reply: &[String]) -> CoreResult<u32> {
    let query = "CONFIG GET databases";
    let [name, value] = reply else {
        return Err(CoreError::config_parse(
            query,
            format!("expected a [name, value] pair, got {} item(s)", reply.len()),
        ));
    };
    if !name.eq_ignore_ascii_case(DATABASES_PARAM) {
        return Err(CoreError::config_parse(
            query,
            format!("reply names parameter {name:?}"),
        ));
    }
    match value.trim().parse::<u32>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(CoreError::config_parse(
            query,
            format!("{value:?} is not a positive integer"),
        )),
    }
}

/// Returns the live key count of `db`, or `0` if it cannot be read.
///
/// Failures are logged rather than returned so that a fan-out over every
/// database is not aborted by one broken database.
pub async fn size_of(pool: &ConnectionPool, db: DatabaseId) -> u64 {
    match try_size_of(pool, db).await {
        Ok(size) => size,
        Err(e) => {
            warn!(db, error = %e, "directory.size_failed");
            0
        }
    }
}

async fn try_size_of(pool: &ConnectionPool, db: DatabaseId) -> CoreResult<u64> {
    let mut conn = pool.acquire(db).await?;
    Ok(conn.dbsize().await?)
}

/// Queries the size of databases `0..count` concurrently.
pub async fn list_sizes(pool: &ConnectionPool, count: u32) -> BTreeMap<DatabaseId, u64> {
    let mut tasks = JoinSet::new();
    for db in 0..count {
        let pool = pool.clone();
        tasks.spawn(async move { (db, size_of(&pool, db).await) });
    }

    let mut sizes = BTreeMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((db, size)) => {
                sizes.insert(db, size);
            }
            Err(e) => warn!(error = %e, "directory.size_task_failed"),
        }
    }
    // A panicked task still leaves its database in the listing.
    for db in 0..count {
        sizes.entry(db).or_insert(0);
    }
    debug!(databases = count, "directory.sizes_listed");
    sizes
}
