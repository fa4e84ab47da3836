// src/llm/mod.rs
// LLM provider boundary: chat-completion with optional function calling.

mod openai_compat;
mod types;

pub use self::openai_compat::OpenAiCompatClient;
pub use self::types::{ChatResult, FunctionCall, FunctionDef, Message, Tool, ToolCall};

use anyhow::Result;
use async_trait::async_trait;

/// Trait for chat clients - the reflection controller only sees this seam.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request with an optional tool schema.
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult>;

    /// Get the model name (for logging)
    fn model_name(&self) -> String;
}
