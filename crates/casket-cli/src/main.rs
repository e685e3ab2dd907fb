//! # casket CLI
//!
//! Command-line interface for the Casket content-addressed file store.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use casket_config::log_cli_info;
use casket_config::logging::{init_logging, LogLevel};
use casket_config::Config;
use casket_store::{BlobStore, MetadataStore};

mod catalog;

use catalog::FileCatalog;

/// Casket - content-addressed, reference-counted file storage
#[derive(Parser)]
#[command(name = "casket")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Primary tier root (overrides config)
    #[arg(long)]
    primary: Option<PathBuf>,

    /// Fallback tier root (overrides config)
    #[arg(long)]
    fallback: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a file; prints the catalog id and stored path
    Store {
        /// File to ingest (consumed by the move)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Caller-asserted display name, used only for the extension
        #[arg(long)]
        name: Option<String>,

        /// Return a unique per-upload alias hard-linked to the blob
        #[arg(long)]
        alias: bool,

        /// Invoker token; generated when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Write a stored blob's bytes to stdout
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Release one owner's claim; prints whether the blob was erased
    Release {
        #[arg(value_name = "PATH")]
        path: String,

        #[arg(long)]
        token: String,
    },

    /// Check whether a stored path resolves to content
    Exists {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Print a stored blob's size in bytes
    Size {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Print the public URL for a stored path
    Url {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Create a ledger record for a blob that predates the ledger
    Adopt {
        #[arg(value_name = "PATH")]
        path: String,

        /// Invoker token; generated when omitted
        #[arg(long)]
        token: Option<String>,
    },

    /// Look up the stored path behind a catalog id
    Lookup {
        #[arg(value_name = "ID")]
        id: u64,
    },

    /// Display blob count and total bytes for the primary tier
    Stats,

    /// Print the default configuration TOML
    InitConfig,
}

fn main() -> Result<()> {
    init_logging(LogLevel::Warn);

    let cli = Cli::parse();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(primary) = cli.primary {
        config.storage.primary = primary;
    }
    if let Some(fallback) = cli.fallback {
        config.storage.fallback = fallback;
    }

    if let Commands::InitConfig = cli.command {
        print!("{}", Config::default_toml());
        return Ok(());
    }

    let store = BlobStore::new(config.store_options()).context("Failed to open blob store")?;
    let catalog = FileCatalog::open(config.storage.primary.join("catalog.json"));

    match cli.command {
        Commands::Store {
            file,
            name,
            alias,
            token,
        } => {
            let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());
            let rel = if alias {
                store.store_with_alias(&file, name.as_deref(), &token)?
            } else {
                store.store_named(&file, name.as_deref(), &token)?
            };
            let id = catalog.insert_if_absent(&rel)?;
            log_cli_info!("stored", id = id, token = token.as_str());
            println!("{id}\t{rel}\t{token}");
        }
        Commands::Cat { path } => {
            let bytes = store.fetch(&path)?;
            std::io::stdout().write_all(&bytes)?;
        }
        Commands::Release { path, token } => {
            let deleted = store.release(&path, &token)?;
            println!("{}", if deleted { "deleted" } else { "retained" });
        }
        Commands::Exists { path } => {
            if store.exists(&path) {
                println!("yes");
            } else {
                println!("no");
                std::process::exit(1);
            }
        }
        Commands::Size { path } => {
            println!("{}", store.size(&path)?);
        }
        Commands::Url { path } => {
            match store.url(&path) {
                Some(url) => println!("{url}"),
                None => anyhow::bail!("no url_prefix configured"),
            }
        }
        Commands::Adopt { path, token } => {
            let token = token.unwrap_or_else(|| Uuid::new_v4().to_string());
            if store.adopt(&path, &token)? {
                println!("adopted\t{token}");
            } else {
                println!("already tracked");
            }
        }
        Commands::Lookup { id } => match catalog.lookup(id)? {
            Some(rel) => println!("{rel}"),
            None => {
                println!("not found");
                std::process::exit(1);
            }
        },
        Commands::Stats => {
            let stats = store.stats()?;
            println!("blobs: {}", stats.blob_count);
            println!("bytes: {}", stats.total_bytes);
        }
        Commands::InitConfig => unreachable!("handled above"),
    }

    Ok(())
}
