mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use photo_dedup::config::DedupConfig;

#[derive(Parser)]
#[command(
    name = "photo-dedup",
    version,
    about = "Find near-duplicate photos in a Google Photos library"
)]
struct Cli {
    /// Config file (defaults to ~/.photo-dedup/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the library, cache thumbnails, and report duplicate groups as JSON
    Run {
        /// Refetch the library even if items are already stored locally
        #[arg(long)]
        refresh: bool,
        /// Write the report here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Show local library statistics
    Stats,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the image embedding model to ~/.photo-dedup/models/
    Download {
        /// Model URL (defaults to embedding.model_url)
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DedupConfig::load_from(path)?,
        None => DedupConfig::load()?,
    };

    // Log to stderr so stdout stays clean for the JSON report.
    let filter = EnvFilter::try_new(&config.log.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    config.validate()?;

    match cli.command {
        Command::Run { refresh, output } => {
            cli::run::run(config, refresh, output.as_deref()).await?;
        }
        Command::Stats => {
            cli::stats::stats(&config)?;
        }
        Command::Model { action } => match action {
            ModelAction::Download { url } => {
                cli::model_download(&config.embedding, url.as_deref()).await?;
            }
        },
    }

    Ok(())
}
