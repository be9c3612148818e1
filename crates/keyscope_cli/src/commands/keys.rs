//! Keys command implementation.

use crate::error::CliResult;
use keyscope_core::Explorer;
use serde::Serialize;

/// Search result.
#[derive(Debug, Serialize)]
pub struct KeysResult {
    /// Database searched.
    pub database: u32,
    /// Pattern as given.
    pub pattern: String,
    /// Matching keys, sorted.
    pub keys: Vec<String>,
}

/// Runs the keys command.
pub async fn run(explorer: &Explorer, pattern: &str, format: &str) -> CliResult<()> {
    let keys = explorer.search(pattern).await?;
    let result = KeysResult {
        database: explorer.current_database(),
        pattern: pattern.to_string(),
        keys,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &KeysResult) {
    if result.keys.is_empty() {
        println!(
            "No keys in db({}) match {:?}. Run `reload` if they were added recently.",
            result.database, result.pattern
        );
        return;
    }
    for key in &result.keys {
        println!("{key}");
    }
    println!();
    println!("{} key(s) in db({})", result.keys.len(), result.database);
}
