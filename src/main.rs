use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

mod catalog;
mod config;
mod notes;
mod semantic;
#[cfg(test)]
mod tests;

use catalog::{CatalogOptions, NoteCatalog};
use config::Config;
use notes::{BackendCsv, NoteCreate};
use semantic::FastembedEmbedder;

#[derive(Parser, Debug)]
#[command(version, about = "Free-text notes with semantic search", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a note
    Add {
        /// Note text
        content: String,

        /// Free-form category label
        #[clap(short = 'g', long)]
        category: Option<String>,
    },
    /// Search notes by meaning
    Search {
        /// Query text
        query: String,

        /// Number of results to return
        #[clap(short, long)]
        k: Option<usize>,
    },
    /// List all notes, newest first
    List {
        /// Print the count only
        #[clap(short = 'c', long, default_value = "false")]
        count: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let base_path = config::resolve_base_path()?;
    let config = Config::load_with(&base_path)?;

    let store = Box::new(BackendCsv::load(&config.notes_path())?);
    let embedder = Arc::new(FastembedEmbedder::new(
        &config.model,
        PathBuf::from(&base_path),
        Some(Duration::from_secs(config.download_timeout_secs)),
    )?);

    let catalog = NoteCatalog::open(
        store,
        embedder,
        config.vectors_path(),
        CatalogOptions {
            dimension: config.dimension,
            embed_timeout: Duration::from_secs(config.embed_timeout_secs),
            default_k: config.default_k,
        },
    )?;

    match args.command {
        Command::Add { content, category } => {
            let note = catalog.ingest(NoteCreate { content, category })?;
            println!("{}", serde_json::to_string_pretty(&note)?);
        }

        Command::Search { query, k } => {
            let k = k.unwrap_or_else(|| catalog.default_k());
            let results = catalog.search(&query, k)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        Command::List { count } => {
            let notes = catalog.list()?;
            if count {
                println!("{} notes", notes.len());
            } else {
                println!("{}", serde_json::to_string_pretty(&notes)?);
            }
        }
    }

    Ok(())
}
