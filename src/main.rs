// src/main.rs
// Engram - self-hosted semantic memory for AI coding assistants

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use engram::config::Config;
use engram::conversations::ConversationIndexer;
use engram::db::DatabasePool;
use engram::embeddings::EmbeddingClient;
use engram::http::create_shared_client;
use engram::index::IndexService;
use engram::llm::OpenAiCompatClient;
use engram::mcp::EngramServer;
use engram::notify::WebhookNotifier;
use engram::reflection::{ReflectionController, ReflectionStaging};
use engram::reminders::ReminderScheduler;
use engram::sandbox::Sandbox;
use engram::scheduler;
use engram::store::{FsObjectStore, ObjectStore};
use engram::web::{AppState, create_router};

#[derive(Parser)]
#[command(name = "engram", about = "Self-hosted semantic memory service for AI coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Listen port (overrides ENGRAM_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    let port_override = match cli.command {
        None | Some(Commands::Serve { port: None }) => None,
        Some(Commands::Serve { port }) => port,
    };

    let config = Config::from_env()?;
    let port = port_override.unwrap_or(config.port);

    serve(config, port).await
}

async fn serve(config: Config, port: u16) -> Result<()> {
    let http_client = create_shared_client();

    // Storage: versioned object store + durable embedding rows.
    let store: Arc<dyn ObjectStore> =
        Arc::new(FsObjectStore::open(config.data_dir.join("store")).await?);
    let pool = Arc::new(DatabasePool::open(&config.data_dir.join("engram.db")).await?);

    // Embeddings: remote endpoint when configured, deterministic local
    // hashing otherwise (search still works, just not semantically).
    let embedder = Arc::new(match &config.embedding.api_url {
        Some(api_url) => EmbeddingClient::api(
            http_client.clone(),
            api_url.clone(),
            config.embedding.api_key.clone(),
            config.embedding.model.clone(),
            config.embedding.dimensions,
        ),
        None => {
            tracing::warn!("EMBEDDING_API_URL not set, using local hashed embeddings");
            EmbeddingClient::hashed(config.embedding.dimensions)
        }
    });

    let index = Arc::new(IndexService::open(pool, embedder).await?);
    let reminders = Arc::new(ReminderScheduler::new(store.clone()));
    let conversations = Arc::new(ConversationIndexer::new(store.clone(), index.clone()));
    let sandbox = Arc::new(Sandbox::new(store.clone()));
    let staging = Arc::new(ReflectionStaging::new(store.clone(), index.clone()));
    let notifier = WebhookNotifier::from_config(http_client.clone(), &config.webhook).map(Arc::new);

    // Reflection needs a chat endpoint and the feature flag.
    let reflection = match (&config.llm.api_url, config.use_agentic_reflection) {
        (Some(api_url), true) => {
            let fast = Arc::new(OpenAiCompatClient::new(
                http_client.clone(),
                api_url.clone(),
                config.llm.api_key.clone(),
                config.llm.fast_model.clone(),
            ));
            let primary = Arc::new(OpenAiCompatClient::new(
                http_client.clone(),
                api_url.clone(),
                config.llm.api_key.clone(),
                config.llm.primary_model.clone(),
            ));
            Some(Arc::new(ReflectionController::new(
                store.clone(),
                index.clone(),
                fast,
                primary,
                notifier.clone(),
            )))
        }
        (None, true) => {
            tracing::warn!("LLM_API_URL not set, reflection disabled");
            None
        }
        _ => {
            tracing::info!("agentic reflection disabled by flag");
            None
        }
    };

    let server = Arc::new(EngramServer {
        store,
        index,
        reminders,
        conversations,
        sandbox,
        staging,
        reflection,
    });

    let scheduler_shutdown = scheduler::spawn(server.clone(), notifier);

    let state = AppState {
        server,
        auth_token: Arc::new(config.auth_token.clone()),
    };
    let router = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "engram listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    let _ = scheduler_shutdown.send(true);
    Ok(())
}
