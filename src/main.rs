//! Visitlog Store CLI
//!
//! ## Usage
//!
//! ```bash
//! # Import a taxonomy and provision selection tables
//! visitlog-store init --taxonomy locations.json --name-types name_types.json
//!
//! # Children of anchors 2 and 4 with selection flags for person 42
//! visitlog-store view --person 42 --anchors 2,4
//!
//! # Save a selection payload (parent id -> "childId|childLocationId" tokens)
//! visitlog-store save --person 42 --selection '{"2": ["0|4"], "4": ["1|8"]}'
//!
//! # Every selected path for person 42
//! visitlog-store report --person 42
//! ```
//!
//! Output is JSON on stdout; logs go to stderr.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use visitlog_store::db::locations::{load_locations_file, load_name_types_file};
use visitlog_store::input::SelectionPayload;
use visitlog_store::services::import_taxonomy;
use visitlog_store::{Config, LocationDb, SelectionService};

#[derive(Parser, Debug)]
#[command(name = "visitlog-store")]
#[command(about = "Per-person location selections over a taxonomy-shaped schema")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "VISITLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "VISITLOG_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Deepest level that gets its own selection table
    #[arg(long)]
    max_materialized_level: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import the taxonomy and create selection tables
    Init {
        /// JSON array of locations
        #[arg(long)]
        taxonomy: PathBuf,

        /// JSON array of name types
        #[arg(long)]
        name_types: Option<PathBuf>,
    },

    /// List children of the anchors with their selection flags
    View {
        #[arg(long)]
        person: i64,

        /// Comma-separated anchor ids (defaults to the configured anchor)
        #[arg(long)]
        anchors: Option<String>,
    },

    /// Save a selection payload
    Save {
        #[arg(long)]
        person: i64,

        /// JSON object of parent id to "childId|childLocationId" tokens
        #[arg(long)]
        selection: Option<String>,
    },

    /// Print every selected hierarchy path
    Report {
        #[arg(long)]
        person: i64,
    },

    /// Print database statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("visitlog_store=info".parse()?),
        )
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(level) = args.max_materialized_level {
        config.max_materialized_level = level;
    }

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(LocationDb::open(&config.database_path())?);
    let config = Arc::new(config);

    match args.command {
        Command::Init { taxonomy, name_types } => {
            let nodes = load_locations_file(&taxonomy)?;
            let name_types = match name_types {
                Some(path) => load_name_types_file(&path)?,
                None => Vec::new(),
            };
            let summary = import_taxonomy(db, config, nodes, name_types).await?;
            print_json(&summary)?;
        }
        Command::View { person, anchors } => {
            let service = SelectionService::load(db, config).await?;
            print_json(&service.view(person, anchors).await?)?;
        }
        Command::Save { person, selection } => {
            let payload = selection
                .map(|raw| serde_json::from_str::<SelectionPayload>(&raw))
                .transpose()?;
            let service = SelectionService::load(db, config).await?;
            print_json(&service.save(person, payload).await?)?;
        }
        Command::Report { person } => {
            let service = SelectionService::load(db, config).await?;
            print_json(&service.report(person).await?)?;
        }
        Command::Stats => {
            print_json(&db.stats()?)?;
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
