//! Docent CLI — the main entry point.
//!
//! Commands:
//! - `serve`    — Start the HTTP gateway
//! - `ingest`   — Ingest documents into the index
//! - `ask`      — Ask one question and stream the answer
//! - `sources`  — List indexed sources
//! - `forget`   — Remove sources from the index

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod bootstrap;
mod commands;

#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent — retrieval-augmented chat over your documents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "DOCENT_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ingest markdown files or directories (default: the configured docs directory)
    Ingest {
        paths: Vec<PathBuf>,
    },

    /// Ask a single question
    Ask {
        #[arg(short, long)]
        message: String,
    },

    /// List indexed sources and their chunk counts
    Sources,

    /// Remove sources from the index
    Forget {
        #[arg(required = true)]
        sources: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ingest { paths } => commands::ingest::run(paths).await?,
        Commands::Ask { message } => commands::ask::run(message).await?,
        Commands::Sources => commands::sources::list().await?,
        Commands::Forget { sources } => commands::sources::forget(sources).await?,
    }

    Ok(())
}
