//! Set command implementation.

use crate::error::CliResult;
use keyscope_core::Explorer;

/// Runs the set command.
pub async fn run(explorer: &Explorer, key: &str, value: &str) -> CliResult<()> {
    explorer.set_value(key, value).await?;
    println!("OK: {key} set in db({})", explorer.current_database());
    Ok(())
}
