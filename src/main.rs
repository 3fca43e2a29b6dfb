use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use aura_relay::agent::{ChatModel, KnowledgeRetriever, ModeController, OpenAiChat, ResponseGenerator};
use aura_relay::api::{ApiServer, ApiState};
use aura_relay::db::{
    self, ChannelRepo, ConversationRepo, Embedder, EmbeddingModel, IdentityRepo, KnowledgeRepo,
    MessageRepo, SettingsRepo,
};
use aura_relay::events::EventBus;
use aura_relay::platforms::{ClientFactory, HttpClientFactory};
use aura_relay::worker::ReplyWorker;
use aura_relay::Config;

/// Aura - omnichannel AI reply gateway for clinic messaging
#[derive(Parser)]
#[command(name = "aura", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "AURA_PORT", default_value = "8080")]
    port: u16,

    /// Path to a TOML config file
    #[arg(long, env = "AURA_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the SQLite database
    #[arg(long, env = "AURA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info,aura_relay=info",
        2 => "debug,aura_relay=debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref(), cli.data_dir)?;
    tracing::info!(
        port = cli.port,
        data_dir = %config.data_dir.display(),
        "starting aura relay"
    );

    let pool = db::init(config.db_path())?;

    let channels = ChannelRepo::new(pool.clone());
    let identities = IdentityRepo::new(pool.clone());
    let conversations = ConversationRepo::new(pool.clone());
    let messages = MessageRepo::new(pool.clone());
    let knowledge = KnowledgeRepo::new(pool.clone());
    let settings = SettingsRepo::new(pool.clone());

    let bus = EventBus::new();
    let clients: Arc<dyn ClientFactory> = Arc::new(HttpClientFactory::new());

    // Missing credentials disable generation and embedding; the pipeline
    // still ingests and the generator answers with its credentials fallback
    let chat: Option<Arc<dyn ChatModel>> = if config.llm.api_key.is_empty() {
        tracing::warn!("no LLM API key configured, replies degrade to fallbacks");
        None
    } else {
        Some(Arc::new(OpenAiChat::new(
            &config.llm.api_base,
            &config.llm.api_key,
            config.llm.max_tokens,
        )?))
    };
    let embedder: Option<Arc<dyn EmbeddingModel>> = if config.llm.api_key.is_empty() {
        None
    } else {
        Some(Arc::new(Embedder::new(
            config.llm.api_base.clone(),
            config.llm.api_key.clone(),
            config.llm.embedding_model.clone(),
        )?))
    };
    let chat_configured = chat.is_some();

    let generator = ResponseGenerator::new(
        messages.clone(),
        KnowledgeRetriever::new(knowledge.clone(), embedder.clone()),
        chat,
        config.llm.model.clone(),
        config.llm.finetuned_model.clone(),
    );

    let (queue, worker) = ReplyWorker::new(
        conversations.clone(),
        channels.clone(),
        messages.clone(),
        settings.clone(),
        generator,
        bus.clone(),
        clients.clone(),
    );
    tokio::spawn(worker.run());

    let modes = ModeController::new(conversations.clone(), bus.clone());

    let state = Arc::new(ApiState {
        db: pool,
        channels,
        identities,
        conversations,
        messages,
        knowledge,
        settings,
        bus,
        queue,
        modes,
        clients,
        embedder,
        chat_configured,
        facebook_verify_token: config.facebook_verify_token,
    });

    ApiServer::new(state, cli.port).run().await?;

    Ok(())
}
