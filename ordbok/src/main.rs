//! Ordbok - offline bilingual dictionary lookup from the command line

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ordbok_lib::{AppState, Collation, Config};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ordbok")]
#[command(version, about = "Look up words in downloadable bilingual dictionaries")]
struct Args {
    /// Directory holding the dictionary store (defaults to the platform data directory)
    #[arg(long, env = "ORDBOK_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Server the tries are downloaded from
    #[arg(long, env = "ORDBOK_BASE_URL", global = true)]
    base_url: Option<String>,

    /// Catalog of known dictionaries (JSON)
    #[arg(long, env = "ORDBOK_CATALOG", global = true)]
    catalog: Option<PathBuf>,

    /// Download timeout in seconds
    #[arg(long, env = "ORDBOK_FETCH_TIMEOUT", global = true)]
    timeout: Option<u64>,

    /// Sibling order used when decoding and searching: codepoint or nordic
    #[arg(long, env = "ORDBOK_COLLATION", global = true)]
    collation: Option<Collation>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List dictionaries in the catalog
    List {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
    },
    /// Prefix search in a dictionary, e.g. `ordbok lookup nob-sme bil`
    Lookup {
        pair: String,
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Download a dictionary for offline use
    Download { pair: String },
    /// List dictionaries saved for offline use
    Saved,
    /// Delete a saved dictionary by content hash
    Delete { hash: String },
    /// Delete every saved dictionary
    Purge,
}

impl Args {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.data_dir {
            Some(dir) => {
                let mut config = Config::from_env()?;
                config.catalog_path = dir.join("dict_metas.json");
                config.data_dir = dir.clone();
                config
            }
            None => Config::from_env()?,
        };
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        if let Some(path) = &self.catalog {
            config.catalog_path = path.clone();
        }
        if let Some(secs) = self.timeout {
            config.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(collation) = self.collation {
            config.collation = collation;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.config()?;
    tracing::debug!(data_dir = %config.data_dir.display(), "Using data directory");

    let state = AppState::new(config).context("Failed to initialise dictionary state")?;

    match args.command {
        Command::List { from, to } => commands::list(&state, from.as_deref(), to.as_deref()),
        Command::Lookup { pair, query, limit } => commands::lookup(&state, &pair, &query, limit).await?,
        Command::Download { pair } => commands::download(&state, &pair).await?,
        Command::Saved => commands::saved(&state).await?,
        Command::Delete { hash } => commands::delete(&state, &hash).await?,
        Command::Purge => commands::purge(&state).await?,
    }
    Ok(())
}
