//! Del command implementation.

use crate::console::Console;
use crate::error::CliResult;
use keyscope_core::{query, BatchOutcome, BatchSummary, DeleteReport, Explorer};

/// Runs the del command. Returns true if the store was modified.
///
/// `*`, or a blank pattern, flushes the database after a y/n confirmation. Other patterns are
/// resolved against the key index first and the match count is confirmed,
/// unless `assume_yes` is set.
pub async fn run(
    explorer: &Explorer,
    console: &mut Console,
    pattern: &str,
    assume_yes: bool,
) -> CliResult<bool> {
    let db = explorer.current_database();

    if query::is_match_all(pattern) {
        let confirmed = assume_yes
            || console
                .confirm(&format!(
                    "Pattern * removes EVERY key of db({db}). Continue?"
                ))
                .await?;
        let report = explorer.delete_matching(pattern, |_| confirmed).await?;
        return Ok(match report {
            DeleteReport::Flushed => {
                println!("db({db}) flushed.");
                true
            }
            DeleteReport::Cancelled => {
                println!("Cancelled; db({db}) unchanged.");
                false
            }
            DeleteReport::Deleted(outcomes) => {
                print_outcomes(&outcomes);
                true
            }
        });
    }

    let keys = explorer.search(pattern).await?;
    if keys.is_empty() {
        println!("No keys in db({db}) match {pattern:?}.");
        return Ok(false);
    }
    if !assume_yes
        && !console
            .confirm(&format!(
                "Delete {} key(s) matching {pattern:?} from db({db})?",
                keys.len()
            ))
            .await?
    {
        println!("Cancelled.");
        return Ok(false);
    }

    let outcomes = explorer.delete_keys(&keys).await;
    print_outcomes(&outcomes);
    Ok(true)
}

fn print_outcomes(outcomes: &[BatchOutcome]) {
    for outcome in outcomes {
        match &outcome.error {
            None => println!(
                "  chunk {}: deleted {}/{} key(s) in {} ms",
                outcome.chunk,
                outcome.deleted,
                outcome.keys,
                outcome.elapsed.as_millis()
            ),
            Some(error) => println!(
                "  chunk {}: FAILED after {} ms: {}",
                outcome.chunk,
                outcome.elapsed.as_millis(),
                error
            ),
        }
    }

    let summary = BatchSummary::from_outcomes(outcomes);
    println!(
        "Deleted {} of {} key(s) in {} chunk(s), {} failed.",
        summary.deleted, summary.keys, summary.chunks, summary.failed
    );
}
