mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kvtree", version, about = "Hierarchical dictionaries over an SQLite key-value store")]
struct Cli {
    /// Path to an existing kvtree database
    #[arg(short = 'd', long = "db", global = true, value_name = "PATH")]
    store: Option<PathBuf>,

    /// JSON file with `manager` and `store` settings
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keys removed per write batch when deleting a subtree
    #[arg(long = "batch-size", global = true, value_name = "N")]
    batch_size: Option<usize>,

    /// Log at debug level (otherwise RUST_LOG, default `warn`)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new kvtree database
    New {
        /// Project name or path for the database file
        name: String,
    },
    /// Create every dictionary along a `/`-separated path
    Mkdir { path: String },
    /// Recursively remove the last dictionary of a path
    Rmdir { path: String },
    /// Store an item at PATH/NAME
    Put {
        path: String,
        /// `null`, `true`/`false`, integers and floats are typed; anything else is text
        value: String,
        /// Parse VALUE as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Print the item at PATH/NAME
    Get { path: String },
    /// Remove the item at PATH/NAME
    Rm { path: String },
    /// List the items and child dictionaries of a dictionary
    Ls {
        path: Option<String>,
        /// Only list items
        #[arg(long, conflicts_with = "dicts")]
        items: bool,
        /// Only list child dictionaries
        #[arg(long)]
        dicts: bool,
        /// Start listing at the first name >= NAME
        #[arg(long, value_name = "NAME")]
        from: Option<String>,
    },
    /// Print a subtree as pretty JSON
    Dump { path: Option<String> },
    /// Reclaim unused space in the database file
    Compact,
}

pub(crate) fn run() -> Result<()> {
    let cli = Cli::parse();
    commands::init_tracing(cli.verbose);
    let config = commands::load_config(cli.config.as_deref(), cli.batch_size)?;

    match cli.command {
        Command::New { name } => commands::cmd_new(&name, &config),
        Command::Mkdir { path } => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            commands::cmd_mkdir(store_path, &config, &path)
        }
        Command::Rmdir { path } => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            commands::cmd_rmdir(store_path, &config, &path)
        }
        Command::Put { path, value, json } => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            commands::cmd_put(store_path, &config, &path, &value, json)
        }
        Command::Get { path } => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            commands::cmd_get(store_path, &config, &path)
        }
        Command::Rm { path } => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            commands::cmd_rm(store_path, &config, &path)
        }
        Command::Ls {
            path,
            items,
            dicts,
            from,
        } => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            let filter = commands::ListFilter::from_flags(items, dicts);
            commands::cmd_ls(store_path, &config, path.as_deref(), filter, from.as_deref())
        }
        Command::Dump { path } => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            commands::cmd_dump(store_path, &config, path.as_deref())
        }
        Command::Compact => {
            let store_path = commands::require_store_path(cli.store.as_deref())?;
            commands::cmd_compact(store_path, &config)
        }
    }
}
