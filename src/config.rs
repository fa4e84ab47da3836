// src/config.rs
// Environment-based configuration - single source of truth for all env vars

use crate::error::{EngramError, Result};
use tracing::{debug, warn};

/// Default embedding dimension when EMBEDDING_DIMENSIONS is unset.
pub const DEFAULT_EMBEDDING_DIM: usize = 1024;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8787;

/// Embedding endpoint configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible embeddings endpoint (EMBEDDING_API_URL)
    pub api_url: Option<String>,
    /// Bearer key for the embeddings endpoint (EMBEDDING_API_KEY)
    pub api_key: Option<String>,
    /// Model name sent with each request (EMBEDDING_MODEL)
    pub model: String,
    /// Vector dimension (EMBEDDING_DIMENSIONS)
    pub dimensions: usize,
}

/// Chat model configuration for the reflection controller
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint (LLM_API_URL)
    pub api_url: Option<String>,
    /// Bearer key (LLM_API_KEY)
    pub api_key: Option<String>,
    /// High-quality model for deep analysis (LLM_PRIMARY_MODEL)
    pub primary_model: String,
    /// Lightweight model for the quick scan (LLM_FAST_MODEL)
    pub fast_model: String,
}

/// Chat webhook configuration for reflection/reminder notifications
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub auth_key: Option<String>,
    pub space_id: Option<String>,
}

impl WebhookConfig {
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }
}

/// Full service configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token required on all non-health endpoints (AUTH_TOKEN)
    pub auth_token: String,
    /// Data directory for the sqlite db and the filesystem object store
    pub data_dir: std::path::PathBuf,
    /// HTTP listen port (ENGRAM_PORT)
    pub port: u16,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub webhook: WebhookConfig,
    /// Feature flag: two-phase agentic reflection (USE_AGENTIC_REFLECTION, default true)
    pub use_agentic_reflection: bool,
}

impl Config {
    /// Load configuration from environment variables (single source of truth)
    pub fn from_env() -> Result<Self> {
        let auth_token = read_var("AUTH_TOKEN")
            .ok_or_else(|| EngramError::Config("AUTH_TOKEN is required".into()))?;

        let data_dir = read_var("ENGRAM_DATA_DIR")
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from("./engram-data"));

        let port = read_var("ENGRAM_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let embedding = EmbeddingConfig {
            api_url: read_var("EMBEDDING_API_URL"),
            api_key: read_var("EMBEDDING_API_KEY"),
            model: read_var("EMBEDDING_MODEL").unwrap_or_else(|| "text-embedding-3-small".into()),
            dimensions: read_var("EMBEDDING_DIMENSIONS")
                .and_then(|d| d.parse().ok())
                .unwrap_or(DEFAULT_EMBEDDING_DIM),
        };

        let llm = LlmConfig {
            api_url: read_var("LLM_API_URL"),
            api_key: read_var("LLM_API_KEY"),
            primary_model: read_var("LLM_PRIMARY_MODEL").unwrap_or_else(|| "gpt-4o".into()),
            fast_model: read_var("LLM_FAST_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
        };

        let webhook = WebhookConfig {
            url: read_var("CHAT_WEBHOOK_URL"),
            auth_key: read_var("CHAT_WEBHOOK_AUTH_KEY"),
            space_id: read_var("CHAT_WEBHOOK_SPACE_ID"),
        };

        let use_agentic_reflection = read_var("USE_AGENTIC_REFLECTION")
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        let config = Self {
            auth_token,
            data_dir,
            port,
            embedding,
            llm,
            webhook,
            use_agentic_reflection,
        };
        config.log_status();
        Ok(config)
    }

    /// Log which optional integrations are configured (without exposing values)
    fn log_status(&self) {
        let mut available = Vec::new();
        if self.embedding.api_url.is_some() {
            available.push("embeddings");
        }
        if self.llm.api_url.is_some() {
            available.push("llm");
        }
        if self.webhook.is_configured() {
            available.push("webhook");
        }

        if available.is_empty() {
            warn!("No external endpoints configured - embeddings fall back to local hashing, reflection is disabled");
        } else {
            debug!(endpoints = ?available, "external endpoints configured");
        }
    }
}

/// Read a single env var, filtering empty values
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
