//! `lore` - chat with the Chroniqueur de Runeterra from the terminal.
//!
//! Runs an interactive chat shell by default, or a direct search with
//! `lore search <query>`.

mod repl;
mod search;

use std::sync::Arc;

use clap::Parser;
use lore_rag::{
    ChatPipeline, ChromaConfig, ChromaRetrievalService, GeminiClient, GeminiConfig, RagConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lore", version, about, long_about = None)]
struct Cli {
    /// Result ceiling for queries that want every relevant document
    #[arg(long, env = "LORE_MAX_RESULTS", default_value_t = 5)]
    max_results: usize,

    /// Sampling temperature of the answers (0.0 to 2.0)
    #[arg(long, env = "LORE_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Fallback answer language when the user's is unclear
    #[arg(long, env = "LORE_LOCALE", default_value = "French")]
    locale: String,

    /// Gemini chat model
    #[arg(long, env = "GEMINI_MODEL")]
    model: Option<String>,

    /// Chroma server URL
    #[arg(long, env = "CHROMA_URL")]
    chroma_url: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Interactive multi-turn chat (the default)
    Chat,
    /// Search the corpus directly, without query planning
    Search {
        /// Search text
        query: String,

        /// Number of documents to show (1 to 10)
        #[arg(short = 'n', long, default_value_t = 3)]
        count: usize,

        /// Stream a markdown summary of the documents found
        #[arg(long)]
        summarize: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn build_pipeline(cli: &Cli) -> anyhow::Result<ChatPipeline> {
    let config = RagConfig::builder()
        .max_results(cli.max_results)
        .temperature(cli.temperature)
        .locale(cli.locale.clone())
        .build()?;

    let mut gemini_config = GeminiConfig::from_env()?;
    if let Some(model) = &cli.model {
        gemini_config = gemini_config.with_model(model.clone());
    }
    let gemini = Arc::new(GeminiClient::new(gemini_config)?);

    let mut chroma_config = ChromaConfig::from_env()?;
    if let Some(url) = &cli.chroma_url {
        chroma_config = chroma_config.with_base_url(url)?;
    }
    info!(chroma = %chroma_config.base_url, "connecting services");
    let chroma = Arc::new(ChromaRetrievalService::new(chroma_config, gemini.clone())?);

    Ok(ChatPipeline::builder()
        .config(config)
        .retrieval_service(chroma)
        .generative_service(gemini)
        .build()?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let pipeline = build_pipeline(&cli)?;

    match cli.command {
        None | Some(Command::Chat) => repl::run(&pipeline).await,
        Some(Command::Search { query, count, summarize }) => {
            search::run(&pipeline, &query, count, summarize).await
        }
    }
}
