//! # docqa CLI
//!
//! The `docqa` binary runs the question-answering service and its supporting
//! commands.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database and run schema migrations |
//! | `docqa serve` | Start the HTTP API server |
//! | `docqa stats` | Print cache, log, and vector index statistics |
//!
//! Secrets are read from the environment (a `.env` file is honored):
//! `BEARER_TOKEN`, `GOOGLE_API_KEY`, and `PINECONE_API_KEY`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docqa::answer::GeminiModel;
use docqa::config::load_config;
use docqa::embedding::GeminiEmbedder;
use docqa::index::PineconeIndex;
use docqa::pipeline::Pipeline;
use docqa::{db, migrate, server, stats};

/// docqa: a retrieval-augmented question answering service for remote
/// documents.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Retrieval-augmented question answering over remote documents",
    version,
    long_about = "docqa downloads a document by URL, chunks and embeds it into a remote \
    vector index, and answers questions about it with a hosted language model constrained \
    to the retrieved context. Answers are served over an authenticated HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the document cache and query
    /// log tables. Idempotent.
    Init,

    /// Start the HTTP API server.
    ///
    /// Runs migrations, connects to the vector index (creating it if
    /// absent), and serves the API on the configured bind address.
    Serve,

    /// Print cache, log, and vector index statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Initialized database at {}", config.db.path.display());
            Ok(())
        }
        Commands::Serve => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "docqa=info,warn".into()),
                )
                .init();

            let bearer_token = config.bearer_token()?;

            let pool = db::connect(&config.db.path).await?;
            migrate::run_migrations(&pool).await?;

            let embedder = GeminiEmbedder::new(&config.gemini)?;
            let index = PineconeIndex::connect(&config.pinecone, config.gemini.dims).await?;
            let model = GeminiModel::new(&config.gemini)?;

            let pipeline = Pipeline {
                config: Arc::new(config),
                pool,
                http: reqwest::Client::new(),
                embedder: Arc::new(embedder),
                index: Arc::new(index),
                model: Arc::new(model),
            };

            server::run_server(pipeline, bearer_token).await
        }
        Commands::Stats => stats::run_stats(&config).await,
    }
}
