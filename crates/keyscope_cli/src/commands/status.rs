//! Status command implementation.

use crate::error::CliResult;
use keyscope_core::{Explorer, ExplorerStatus};

/// Runs the status command.
pub fn run(explorer: &Explorer, format: &str) -> CliResult<()> {
    let status = explorer.status();
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        _ => print_text_output(&status),
    }
    Ok(())
}

fn print_text_output(status: &ExplorerStatus) {
    println!("Endpoint:    {}", status.address);
    println!(
        "Database:    db({}) of {}",
        status.database, status.database_count
    );
    println!(
        "Pool:        {} in use, {} idle, max {}",
        status.in_use, status.idle, status.max_connections
    );
    println!(
        "Index:       {}/{} database(s) ready",
        status.indexed_databases, status.database_count
    );
    match status.indexed_keys {
        Some(keys) => println!("Active db:   {keys} key(s) indexed"),
        None => println!("Active db:   still loading"),
    }
}
