//! Keyscope CLI
//!
//! Browse, search and bulk-edit the keys of a Redis-compatible store.
//!
//! # Commands
//!
//! - `shell` - Interactive session (default)
//! - `keys` - List keys matching a glob pattern
//! - `get` - Show the values of matching keys
//! - `del` - Delete matching keys
//! - `set` - Set one key
//! - `dbs` - List databases and their sizes

mod commands;
mod console;
mod error;

use clap::{Parser, Subcommand};
use commands::shell::ShellOptions;
use console::Console;
use error::{CliError, CliResult};
use keyscope_core::{EngineConfig, Explorer, GlobSyntax, PoolConfig, MAX_POOL_SIZE};
use keyscope_store::{Endpoint, TcpConnector};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Keyscope key-value store explorer.
#[derive(Parser)]
#[command(name = "keyscope")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Store host
    #[arg(global = true, long, default_value = "127.0.0.1")]
    host: String,

    /// Store port
    #[arg(global = true, long, default_value_t = 6379)]
    port: u16,

    /// Store password
    #[arg(global = true, long, env = "KEYSCOPE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Maximum pooled connections (1-100)
    #[arg(global = true, long, default_value_t = 10)]
    max_connections: usize,

    /// Database to start in
    #[arg(global = true, long, default_value_t = 0)]
    db: u32,

    /// Seconds to wait when dialing
    #[arg(global = true, long, default_value_t = 30)]
    connect_timeout_secs: u64,

    /// Seconds a query waits for a loading index (waits forever if unset)
    #[arg(global = true, long)]
    ready_timeout_secs: Option<u64>,

    /// Pattern syntax: literal (only * is special) or legacy (regex classes kept)
    #[arg(global = true, long, default_value = "literal")]
    glob_syntax: GlobSyntax,

    /// Match keys in their exact case
    #[arg(global = true, long)]
    case_sensitive: bool,

    /// Reindex after del and set
    #[arg(global = true, long)]
    auto_reload: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session
    Shell {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List keys matching a glob pattern
    Keys {
        /// Glob pattern; * matches any run of characters
        #[arg(default_value = "*")]
        pattern: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the values of keys matching a pattern
    Get {
        /// Glob pattern
        pattern: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete keys matching a pattern
    Del {
        /// Glob pattern; * flushes the whole database
        pattern: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Set one key
    Set {
        /// Exact key
        key: String,

        /// Value
        value: String,
    },

    /// List databases and their sizes
    Dbs {
        /// Only list the first N databases
        #[arg(short, long)]
        limit: Option<u32>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let command = cli.command.unwrap_or(Commands::Shell {
        format: "text".to_string(),
    });
    if let Commands::Version = command {
        println!("Keyscope CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if !(1..=MAX_POOL_SIZE).contains(&cli.max_connections) {
        return Err(CliError::usage(format!(
            "--max-connections must be between 1 and {MAX_POOL_SIZE}"
        )));
    }

    let mut endpoint = Endpoint::new(cli.host, cli.port)
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout_secs));
    if let Some(password) = cli.password {
        endpoint = endpoint.with_password(password);
    }
    let pool = PoolConfig::new(endpoint).with_max_connections(cli.max_connections);
    let mut engine = EngineConfig::new()
        .with_glob_syntax(cli.glob_syntax)
        .with_case_sensitive(cli.case_sensitive);
    if let Some(secs) = cli.ready_timeout_secs {
        engine = engine.with_ready_timeout(Duration::from_secs(secs));
    }

    tracing::debug!(
        address = %pool.endpoint.address(),
        max_connections = pool.max_connections,
        glob_syntax = ?engine.glob_syntax,
        case_sensitive = engine.case_sensitive,
        "cli.connecting"
    );
    let mut explorer = Explorer::connect(pool, engine, Arc::new(TcpConnector::new())).await?;
    explorer.switch_database(cli.db)?;
    let mut console = Console::new();

    match command {
        Commands::Shell { format } => {
            let options = ShellOptions {
                format,
                auto_reload: cli.auto_reload,
            };
            commands::shell::run(&mut explorer, &mut console, &options).await?;
        }
        Commands::Keys { pattern, format } => {
            commands::keys::run(&explorer, &pattern, &format).await?;
        }
        Commands::Get { pattern, format } => {
            commands::get::run(&explorer, &pattern, &format).await?;
        }
        Commands::Del { pattern, yes } => {
            commands::del::run(&explorer, &mut console, &pattern, yes).await?;
        }
        Commands::Set { key, value } => {
            commands::set::run(&explorer, &key, &value).await?;
        }
        Commands::Dbs { limit, format } => {
            commands::dbs::run(&explorer, limit, &format).await?;
        }
        Commands::Version => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_matching_flags() {
        let cli = Cli::try_parse_from(["keyscope", "keys", "user:*"]).unwrap();
        assert_eq!(cli.glob_syntax, GlobSyntax::Literal);
        assert!(!cli.case_sensitive);

        let cli = Cli::try_parse_from([
            "keyscope",
            "keys",
            "user:[0-9]",
            "--glob-syntax",
            "legacy",
            "--case-sensitive",
        ])
        .unwrap();
        assert_eq!(cli.glob_syntax, GlobSyntax::Legacy);
        assert!(cli.case_sensitive);

        assert!(Cli::try_parse_from(["keyscope", "--glob-syntax", "pcre"]).is_err());
    }
}
