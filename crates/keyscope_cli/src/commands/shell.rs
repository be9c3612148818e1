//! Interactive shell.
//!
//! Reads one command per line and runs it against the session. A failing
//! command prints its error and the shell keeps going.

use crate::commands::{dbs, del, get, keys, set, status};
use crate::console::Console;
use crate::error::CliResult;
use keyscope_core::{Explorer, MAX_POOL_SIZE};
use keyscope_store::Endpoint;

/// Settings shared by every shell command.
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Output format (text, json).
    pub format: String,
    /// Reindex after `del` and `set`.
    pub auto_reload: bool,
}

/// A parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Blank line.
    Empty,
    /// `keys [pattern]`
    Keys(String),
    /// `get <pattern>`
    Get(String),
    /// `del <pattern>`
    Del(String),
    /// `set <key> <value...>`
    Set {
        /// Exact key.
        key: String,
        /// Rest of the line.
        value: String,
    },
    /// `dbs [limit]`
    Dbs(Option<u32>),
    /// `use <db>`
    Use(u32),
    /// `connect <host> <port> [password|-] [max]`
    Connect {
        /// Store host.
        host: String,
        /// Store port.
        port: u16,
        /// Password; `None` connects without one.
        password: Option<String>,
        /// New pool bound; `None` keeps the current one.
        max_connections: Option<usize>,
    },
    /// `reload`
    Reload,
    /// `status`
    Status,
    /// `help`
    Help,
    /// `quit`
    Quit,
}

/// Parses one shell line.
pub fn parse(line: &str) -> Result<ShellCommand, String> {
    let line = line.trim();
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "" => ShellCommand::Empty,
        "keys" => ShellCommand::Keys(if rest.is_empty() { "*" } else { rest }.to_string()),
        "get" => ShellCommand::Get(required(rest, "get <pattern>")?),
        "del" => ShellCommand::Del(required(rest, "del <pattern>")?),
        "set" => {
            let (key, value) = rest
                .split_once(char::is_whitespace)
                .ok_or_else(|| "usage: set <key> <value>".to_string())?;
            ShellCommand::Set {
                key: key.to_string(),
                value: value.trim_start().to_string(),
            }
        }
        "dbs" => ShellCommand::Dbs(if rest.is_empty() {
            None
        } else {
            Some(number(rest, "dbs [limit]")?)
        }),
        "use" => ShellCommand::Use(number(rest, "use <db>")?),
        "connect" => parse_connect(rest)?,
        "reload" => ShellCommand::Reload,
        "status" => ShellCommand::Status,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" => ShellCommand::Quit,
        other => return Err(format!("unknown command {other:?}; type `help`")),
    };
    Ok(command)
}

const CONNECT_USAGE: &str = "usage: connect <host> <port> [password|-] [max]";

fn parse_connect(rest: &str) -> Result<ShellCommand, String> {
    let args: Vec<&str> = rest.split_whitespace().collect();
    let [host, port, extra @ ..] = args.as_slice() else {
        return Err(CONNECT_USAGE.to_string());
    };
    if extra.len() > 2 {
        return Err(CONNECT_USAGE.to_string());
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("{CONNECT_USAGE} (bad port {port:?})"))?;
    let password = match extra.first() {
        None | Some(&"-") => None,
        Some(password) => Some(password.to_string()),
    };
    let max_connections = match extra.get(1) {
        None => None,
        Some(max) => match max.parse::<usize>() {
            Ok(max) if (1..=MAX_POOL_SIZE).contains(&max) => Some(max),
            _ => {
                return Err(format!(
                    "{CONNECT_USAGE} (max must be between 1 and {MAX_POOL_SIZE}, got {max:?})"
                ))
            }
        },
    };
    Ok(ShellCommand::Connect {
        host: host.to_string(),
        port,
        password,
        max_connections,
    })
}

fn required(rest: &str, usage: &str) -> Result<String, String> {
    if rest.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(rest.to_string())
    }
}

fn number(rest: &str, usage: &str) -> Result<u32, String> {
    rest.parse()
        .map_err(|_| format!("usage: {usage} (expected a non-negative integer, got {rest:?})"))
}

enum Flow {
    Continue,
    Quit,
}

/// Runs the shell until `quit` or end of input.
pub async fn run(
    explorer: &mut Explorer,
    console: &mut Console,
    options: &ShellOptions,
) -> CliResult<()> {
    print_help();
    loop {
        let prompt = format!("keyscope db({})> ", explorer.current_database());
        let Some(line) = console.read_line(&prompt).await? else {
            println!();
            return Ok(());
        };
        let command = match parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        match execute(explorer, console, options, command).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => return Ok(()),
            Err(e) => println!("error: {e}"),
        }
    }
}

async fn execute(
    explorer: &mut Explorer,
    console: &mut Console,
    options: &ShellOptions,
    command: ShellCommand,
) -> CliResult<Flow> {
    match command {
        ShellCommand::Empty => {}
        ShellCommand::Keys(pattern) => keys::run(explorer, &pattern, &options.format).await?,
        ShellCommand::Get(pattern) => get::run(explorer, &pattern, &options.format).await?,
        ShellCommand::Del(pattern) => {
            if del::run(explorer, console, &pattern, false).await? && options.auto_reload {
                reload(explorer);
            }
        }
        ShellCommand::Set { key, value } => {
            set::run(explorer, &key, &value).await?;
            if options.auto_reload {
                reload(explorer);
            }
        }
        ShellCommand::Dbs(limit) => dbs::run(explorer, limit, &options.format).await?,
        ShellCommand::Use(db) => {
            explorer.switch_database(db)?;
            println!("Now using db({db}).");
        }
        ShellCommand::Connect {
            host,
            port,
            password,
            max_connections,
        } => {
            let mut config = explorer.pool().config();
            let mut endpoint =
                Endpoint::new(host, port).with_connect_timeout(config.endpoint.connect_timeout);
            if let Some(password) = password {
                endpoint = endpoint.with_password(password);
            }
            config.endpoint = endpoint;
            if let Some(max) = max_connections {
                config = config.with_max_connections(max);
            }
            let address = config.endpoint.address();
            explorer.reconfigure(config).await?;
            println!(
                "Connected to {address}: {} database(s), now using db({}).",
                explorer.database_count(),
                explorer.current_database()
            );
        }
        ShellCommand::Reload => reload(explorer),
        ShellCommand::Status => status::run(explorer, &options.format)?,
        ShellCommand::Help => print_help(),
        ShellCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn reload(explorer: &mut Explorer) {
    explorer.reload_index();
    println!(
        "Reindexing {} database(s) in the background.",
        explorer.database_count()
    );
}

fn print_help() {
    println!("Commands:");
    println!("  keys [pattern]     list keys matching a glob (* = any run of characters)");
    println!("  get <pattern>      show the values of matching keys");
    println!("  del <pattern>      delete matching keys (* flushes the database)");
    println!("  set <key> <value>  set one key");
    println!("  dbs [limit]        list databases with their sizes");
    println!("  use <db>           switch the active database");
    println!("  connect <host> <port> [password|-] [max]");
    println!("                     reconnect elsewhere and reindex");
    println!("  reload             rebuild the local key index");
    println!("  status             show session and index state");
    println!("  help               show this list");
    println!("  quit               leave the shell");
    println!("Patterns ignore case unless started with --case-sensitive.");
}
