// src/llm/openai_compat.rs
// OpenAI-compatible chat completions client (request build + response parse)

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{ChatResult, FunctionCall, LlmClient, Message, Tool, ToolCall};

/// Chat completion request (OpenAI-compatible format)
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>, // "auto" | "required" | "none"
}

/// Non-streaming chat response (OpenAI-compatible format)
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    arguments: String,
}

/// Parse an OpenAI-compatible chat response body into a ChatResult
fn parse_chat_response(body: &str) -> Result<ChatResult> {
    let data: ChatResponse =
        serde_json::from_str(body).map_err(|e| anyhow!("Failed to parse chat response: {}", e))?;

    let choice = data.choices.into_iter().next();
    let (content, tool_calls) = match choice {
        Some(c) => {
            let msg = c.message;
            let tc: Option<Vec<ToolCall>> = msg.tool_calls.map(|calls| {
                calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: tc.id,
                        call_type: tc.call_type,
                        function: FunctionCall {
                            name: tc.function.name,
                            arguments: tc.function.arguments,
                        },
                    })
                    .collect()
            });
            (msg.content, tc)
        }
        None => (None, None),
    };

    Ok(ChatResult {
        content,
        tool_calls,
    })
}

/// Client for any OpenAI-compatible /chat/completions endpoint.
pub struct OpenAiCompatClient {
    http_client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(
        http_client: reqwest::Client,
        api_url: String,
        api_key: Option<String>,
        model: String,
    ) -> Self {
        Self {
            http_client,
            api_url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn chat(&self, messages: Vec<Message>, tools: Option<Vec<Tool>>) -> Result<ChatResult> {
        let tool_choice = tools.as_ref().map(|_| "auto".to_string());
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            tools,
            tool_choice,
        };

        let mut builder = self.http_client.post(&self.api_url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.context("chat request failed")?;
        let status = response.status();
        let body = response.text().await.context("chat response body")?;
        if !status.is_success() {
            return Err(anyhow!("chat API error {}: {}", status, body));
        }

        parse_chat_response(&body)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}
