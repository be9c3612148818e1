//! Dbs command implementation.

use crate::error::CliResult;
use keyscope_core::{Explorer, IndexState};
use serde::Serialize;

/// One listed database.
#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    /// Database number.
    pub id: u32,
    /// Live key count reported by the store.
    pub size: u64,
    /// Index state: `ready`, `loading` or `not_loaded`.
    pub index: &'static str,
    /// Keys in the local index, if ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_keys: Option<usize>,
}

/// Runs the dbs command.
pub async fn run(explorer: &Explorer, limit: Option<u32>, format: &str) -> CliResult<()> {
    let sizes = explorer.list_sizes(limit).await;
    let databases: Vec<DatabaseInfo> = sizes
        .into_iter()
        .map(|(id, size)| {
            let state = explorer.index_state(id);
            DatabaseInfo {
                id,
                size,
                index: state_name(&state),
                indexed_keys: match state {
                    IndexState::Ready(index) => Some(index.key_count()),
                    _ => None,
                },
            }
        })
        .collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&databases)?),
        _ => print_text_output(explorer, &databases),
    }
    Ok(())
}

fn state_name(state: &IndexState) -> &'static str {
    match state {
        IndexState::NotLoaded => "not_loaded",
        IndexState::Loading => "loading",
        IndexState::Ready(_) => "ready",
    }
}

fn print_text_output(explorer: &Explorer, databases: &[DatabaseInfo]) {
    println!(
        "{} of {} database(s):",
        databases.len(),
        explorer.database_count()
    );
    for db in databases {
        let marker = if db.id == explorer.current_database() {
            "*"
        } else {
            " "
        };
        let indexed = db
            .indexed_keys
            .map_or_else(|| db.index.to_string(), |keys| keys.to_string());
        println!("{marker} db({})={:<10} indexed={}", db.id, db.size, indexed);
    }
}
