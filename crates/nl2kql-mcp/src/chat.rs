//! Chat-completion capability.
//!
//! Query generation talks to two opaque capabilities: a directly-held chat
//! client (Azure OpenAI) and, optionally, the calling session's own sampling
//! capability. Both are traits so tests can substitute stubs.

use anyhow::{bail, Context};
use async_trait::async_trait;
use nl2kql_core::ModelSettings;
use serde::Serialize;
use serde_json::{json, Value};

const API_VERSION: &str = "2024-06-01";

/// One message of a chat conversation. The role set is closed by
/// construction; every consumer matches it exhaustively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(String),
}

impl ChatMessage {
    /// Wire-format role name.
    pub fn role(&self) -> &'static str {
        match self {
            ChatMessage::System(_) => "system",
            ChatMessage::User(_) => "user",
            ChatMessage::Assistant(_) => "assistant",
        }
    }

    /// Message text.
    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System(text) | ChatMessage::User(text) | ChatMessage::Assistant(text) => {
                text
            }
        }
    }
}

/// Opaque chat capability: given a conversation, return the assistant text.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String>;
}

/// Azure OpenAI chat-completions client.
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    deployment: String,
    key: String,
}

impl AzureOpenAiClient {
    /// Create a client from model settings. Key-based authentication only.
    pub fn new(model: &ModelSettings) -> anyhow::Result<Self> {
        let key = match &model.key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => bail!("model key is not configured"),
        };

        Ok(Self {
            http: reqwest::Client::new(),
            endpoint: model.endpoint.trim_end_matches('/').to_string(),
            deployment: model.deployment.clone(),
            key,
        })
    }
}

#[async_trait]
impl ChatCompletion for AzureOpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, API_VERSION
        );

        let body = json!({
            "messages": messages
                .iter()
                .map(|m| json!({ "role": m.role(), "content": m.content() }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .http
            .post(&url)
            .header("api-key", &self.key)
            .json(&body)
            .send()
            .await
            .context("chat completion request failed")?
            .error_for_status()
            .context("chat completion request rejected")?;

        let body: Value = response
            .json()
            .await
            .context("failed to parse chat completion response")?;

        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .context("no content in chat completion response")?;

        Ok(content.to_string())
    }
}

/// A sampling request routed through the calling session.
#[derive(Debug, Clone, Serialize)]
pub struct CreateMessageParams {
    pub messages: Vec<SamplingMessage>,
    #[serde(rename = "systemPrompt")]
    pub system_prompt: String,
    #[serde(rename = "includeContext")]
    pub include_context: String,
    pub temperature: f32,
}

/// One user or assistant turn of a sampling request. System text never
/// appears here; it is folded into the combined system prompt.
#[derive(Debug, Clone, Serialize)]
pub struct SamplingMessage {
    pub role: String,
    pub content: SamplingContent,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplingContent {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl SamplingMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self::with_role("user", text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_role("assistant", text)
    }

    fn with_role(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: SamplingContent {
                kind: "text".to_string(),
                text: text.into(),
            },
        }
    }
}

/// Opaque sampling capability obtained from the calling session.
#[async_trait]
pub trait SamplingClient: Send + Sync {
    async fn create_message(&self, params: CreateMessageParams) -> anyhow::Result<String>;
}
