//! The external LLM completion API seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ScriptError, ScriptResult};

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chat turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single-turn completion request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A completion with its token accounting.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: Option<String>,
}

/// The LLM completion seam.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> ScriptResult<CompletionResponse>;
}

#[derive(Deserialize)]
struct WireContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireContentBlock>,
    usage: WireUsage,
    stop_reason: Option<String>,
}

/// reqwest-backed completion client speaking the messages wire shape.
pub struct HttpCompletionApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpCompletionApi {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl CompletionApi for HttpCompletionApi {
    async fn complete(&self, request: &CompletionRequest) -> ScriptResult<CompletionResponse> {
        let mut http = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(request);
        if let Some(key) = &self.api_key {
            http = http.header("x-api-key", key);
        }

        let response = http.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScriptError::Llm {
                status: Some(status.as_u16()),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let wire: WireResponse = response.json().await?;
        let text: String = wire
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(ScriptError::EmptyCompletion);
        }

        Ok(CompletionResponse {
            text,
            input_tokens: wire.usage.input_tokens,
            output_tokens: wire.usage.output_tokens,
            stop_reason: wire.stop_reason,
        })
    }
}
