//! Multimodal collaborator: trait plus an OpenAI-compatible adapter.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

use super::llm::{Completion, LlmError};

/// Tagged content union for chat messages. Every adapter must handle both
/// variants exhaustively; there is no duck-typed passthrough.
#[derive(Debug, Clone)]
pub enum ChatContent {
    Text(String),
    Image { data: Vec<u8>, mime: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
}

impl ChatRole {
    fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Vec<ChatContent>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: vec![ChatContent::Text(text.into())],
        }
    }

    pub fn user(content: Vec<ChatContent>) -> Self {
        Self {
            role: ChatRole::User,
            content,
        }
    }
}

#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion, LlmError>;
}

#[derive(Debug, Clone)]
pub struct VisionClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// OpenAI-compatible vision adapter; images travel as base64 data URLs.
#[derive(Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    config: VisionClientConfig,
}

#[derive(Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WirePart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text { text: String },
    ImageUrl { image_url: WireImageUrl },
}

#[derive(Serialize)]
struct WireImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct VisionResponse {
    choices: Vec<VisionChoice>,
}

#[derive(Deserialize)]
struct VisionChoice {
    message: VisionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct VisionMessage {
    content: Option<String>,
}

impl VisionClient {
    pub fn new(config: VisionClientConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    fn encode(message: &ChatMessage) -> WireMessage {
        let content = message
            .content
            .iter()
            .map(|part| match part {
                ChatContent::Text(text) => WirePart::Text { text: text.clone() },
                ChatContent::Image { data, mime } => WirePart::ImageUrl {
                    image_url: WireImageUrl {
                        url: format!(
                            "data:{mime};base64,{}",
                            general_purpose::STANDARD.encode(data)
                        ),
                    },
                },
            })
            .collect();

        WireMessage {
            role: message.role.as_str(),
            content,
        }
    }
}

#[async_trait]
impl VisionModel for VisionClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<Completion, LlmError> {
        let request = VisionRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(Self::encode).collect(),
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
        };

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&request);
        if let Some(key) = self.config.api_key.as_deref() {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: VisionResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Malformed(err.to_string()))?;
        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("vision response contained no choices".to_string()))?;
        let content = choice
            .message
            .content
            .ok_or_else(|| LlmError::Malformed("vision choice contained no content".to_string()))?;

        Ok(Completion {
            content,
            finish_reason: choice.finish_reason,
        })
    }
}
