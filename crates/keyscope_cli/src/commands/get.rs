//! Get command implementation.

use crate::error::CliResult;
use keyscope_core::{CoreResult, Explorer};
use serde::Serialize;
use std::collections::BTreeMap;

/// One fetched key.
#[derive(Debug, Serialize)]
pub struct ValueEntry {
    /// The key.
    pub key: String,
    /// Its value, if it could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Why it could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Flattens per-key results into display entries, in key order.
pub fn entries(values: BTreeMap<String, CoreResult<String>>) -> Vec<ValueEntry> {
    values
        .into_iter()
        .map(|(key, result)| match result {
            Ok(value) => ValueEntry {
                key,
                value: Some(value),
                error: None,
            },
            Err(e) => ValueEntry {
                key,
                value: None,
                error: Some(e.to_string()),
            },
        })
        .collect()
}

/// Runs the get command.
pub async fn run(explorer: &Explorer, pattern: &str, format: &str) -> CliResult<()> {
    let entries = entries(explorer.get_matching(pattern).await?);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&entries)?),
        _ => print_text_output(&entries, pattern),
    }
    Ok(())
}

fn print_text_output(entries: &[ValueEntry], pattern: &str) {
    if entries.is_empty() {
        println!("No keys match {pattern:?}. Run `reload` if they were added recently.");
        return;
    }
    for entry in entries {
        match (&entry.value, &entry.error) {
            (Some(value), _) => println!("{}={}", entry.key, value),
            (None, Some(error)) => println!("{}=<{}>", entry.key, error),
            (None, None) => println!("{}=", entry.key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keyscope_core::CoreError;

    #[test]
    fn entries_keep_errors_per_key() {
        let mut values = BTreeMap::new();
        values.insert("b".to_string(), Ok("2".to_string()));
        values.insert(
            "a".to_string(),
            Err(CoreError::KeyNotFound { key: "a".into() }),
        );

        let entries = entries(values);
        assert_eq!(entries[0].key, "a");
        assert!(entries[0].value.is_none());
        assert_eq!(entries[0].error.as_deref(), Some("key not found: a"));
        assert_eq!(entries[1].value.as_deref(), Some("2"));

        let json = serde_json::to_string(&entries[1]).unwrap();
        assert_eq!(json, r#"{"key":"b","value":"2"}"#);
    }
}
