use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use groundline_core::ConversationTurn;
use groundline_engine::{EngineConfig, GroundingEngine};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "groundline",
    about = "Groundline: grounding and hallucination checks for conversational replies"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "groundline.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline over a draft reply and print the result
    Check {
        #[command(flatten)]
        exchange: ExchangeArgs,
    },
    /// Print the hallucination report for a draft reply
    Detect {
        #[command(flatten)]
        exchange: ExchangeArgs,
    },
    /// Retrieve grounding candidates for a query
    Retrieve {
        #[arg(short, long)]
        query: String,
        /// Collections to search (defaults to the configured ones)
        #[arg(long = "collection")]
        collections: Vec<String>,
        /// Maximum number of candidates (overrides config)
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Load a JSON array of documents into a collection and persist it
    Ingest {
        #[arg(long)]
        collection: String,
        /// JSON file of `[{"text": ..., "metadata": {...}}]`
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct ExchangeArgs {
    /// Draft reply to check
    #[arg(long)]
    reply: String,
    /// User input the reply answers
    #[arg(long)]
    input: String,
    /// JSON file with prior turns, oldest first
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct Document {
    text: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn load_history(path: Option<&Path>) -> anyhow::Result<Vec<ConversationTurn>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let data = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read history file '{}': {e}", path.display())
    })?;
    Ok(serde_json::from_str(&data)?)
}

async fn load_documents(path: &Path) -> anyhow::Result<Vec<Document>> {
    let data = tokio::fs::read_to_string(path).await.map_err(|e| {
        anyhow::anyhow!("Failed to read documents file '{}': {e}", path.display())
    })?;
    Ok(serde_json::from_str(&data)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = EngineConfig::load(&cli.config).await?;
    let engine = GroundingEngine::new(config)?;
    engine.init().await;

    match cli.command {
        Commands::Check { exchange } => {
            let history = load_history(exchange.history.as_deref()).await?;
            let options = engine.config().pipeline.clone();
            let result = engine
                .prevent_hallucinations(&exchange.reply, &exchange.input, &history, &options)
                .await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Detect { exchange } => {
            let history = load_history(exchange.history.as_deref()).await?;
            let report = engine
                .detect_hallucinations(&exchange.reply, &exchange.input, &history)
                .await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Retrieve {
            query,
            collections,
            limit,
        } => {
            let mut pipeline = engine.config().pipeline.clone();
            if let Some(limit) = limit {
                pipeline.retrieval_limit = limit;
            }
            let candidates = engine
                .retrieve_enhanced(&query, &collections, &pipeline.retrieval_options())
                .await;
            println!("{}", serde_json::to_string_pretty(&candidates)?);
        }
        Commands::Ingest { collection, file } => {
            let documents = load_documents(&file).await?;
            let mut added = 0;
            for doc in documents {
                engine.add_knowledge(&collection, &doc.text, doc.metadata).await?;
                added += 1;
            }
            let written = engine.persist().await?;
            if written == 0 {
                warn!("No snapshot_dir configured, ingested records were not persisted");
            }
            info!(collection = %collection, added, "Documents ingested");
            println!("Ingested {added} document(s) into '{collection}'");
        }
    }

    Ok(())
}
