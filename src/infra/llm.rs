//! Text-generation collaborator: trait plus an OpenAI-compatible adapter.
//!
//! The pipeline only depends on [`TextGenerator`]; the adapter speaks the
//! chat-completions wire protocol over reqwest and owns transient-error
//! retries so callers see either a payload or a definitive failure.

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const SOURCE: &str = "infra::llm::ChatClient";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("collaborator transport error: {0}")]
    Transport(String),
    #[error("collaborator returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("collaborator response malformed: {0}")]
    Malformed(String),
    #[error("collaborator not configured: {0}")]
    Unconfigured(&'static str),
    #[error("collaborator unreachable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl LlmError {
    /// Transient failures are retried locally; the rest escalate at once.
    fn transient(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Malformed(_) => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::Unconfigured(_) | LlmError::Exhausted { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub finish_reason: Option<String>,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;

    /// Streaming variant yielding incremental content chunks. Adapters
    /// without a streaming wire protocol may return a single-chunk stream
    /// over the full completion.
    fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> BoxStream<'static, Result<String, LlmError>>;
}

/// Collect a streamed completion into a single payload.
pub async fn collect_stream(
    mut stream: BoxStream<'static, Result<String, LlmError>>,
) -> Result<String, LlmError> {
    let mut content = String::new();
    while let Some(chunk) = stream.next().await {
        content.push_str(&chunk?);
    }
    Ok(content)
}

#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ChatClientConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| LlmError::Transport(err.to_string()))?;
        Ok(Self { http, config })
    }

    fn build_request<'a>(&'a self, request: &'a CompletionRequest, stream: bool) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref() {
            messages.push(WireMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(WireMessage {
            role: "user",
            content: &request.prompt,
        });

        ChatRequest {
            model: request.model.as_deref().unwrap_or(&self.config.model),
            messages,
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: request.temperature.unwrap_or(self.config.temperature),
            stream,
        }
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = self.build_request(request, stream);
        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&body);
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
        Ok(response)
    }

    async fn complete_once(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let response = self.send(request, false).await?;
        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Malformed(err.to_string()))?;

        let choice = payload
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("response contained no choices".to_string()))?;
        let content = choice
            .message
            .content
            .ok_or_else(|| LlmError::Malformed("choice contained no content".to_string()))?;

        Ok(Completion {
            content,
            finish_reason: choice.finish_reason,
        })
    }
}

#[async_trait]
impl TextGenerator for ChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let attempts = self.config.retries.max(1);
        let mut last: Option<LlmError> = None;

        for attempt in 1..=attempts {
            match self.complete_once(&request).await {
                Ok(completion) => return Ok(completion),
                Err(err) if err.transient() && attempt < attempts => {
                    warn!(
                        target = "lucido::llm",
                        source = SOURCE,
                        attempt,
                        error = %err,
                        "transient completion failure, backing off"
                    );
                    tokio::time::sleep(self.config.backoff * attempt).await;
                    last = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(LlmError::Exhausted {
            attempts,
            last: last.map(|err| err.to_string()).unwrap_or_default(),
        })
    }

    fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> BoxStream<'static, Result<String, LlmError>> {
        let client = self.clone();
        Box::pin(try_stream! {
            let response = client.send(&request, true).await?;
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|err| LlmError::Transport(err.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        continue;
                    }

                    let parsed: StreamChunk = serde_json::from_str(data)
                        .map_err(|err| LlmError::Malformed(err.to_string()))?;
                    if let Some(content) = parsed
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|choice| choice.delta.content)
                        && !content.is_empty()
                    {
                        yield content;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LlmError::Transport("reset".into()).transient());
        assert!(LlmError::Status { status: 429, body: String::new() }.transient());
        assert!(LlmError::Status { status: 503, body: String::new() }.transient());
        assert!(!LlmError::Status { status: 401, body: String::new() }.transient());
        assert!(!LlmError::Unconfigured("vision").transient());
    }

    #[tokio::test]
    async fn collect_stream_concatenates_chunks() {
        let stream: BoxStream<'static, Result<String, LlmError>> =
            Box::pin(futures::stream::iter(vec![
                Ok("Hello ".to_string()),
                Ok("world".to_string()),
            ]));
        assert_eq!(collect_stream(stream).await.unwrap(), "Hello world");
    }

    #[tokio::test]
    async fn collect_stream_propagates_errors() {
        let stream: BoxStream<'static, Result<String, LlmError>> =
            Box::pin(futures::stream::iter(vec![
                Ok("partial".to_string()),
                Err(LlmError::Transport("cut".into())),
            ]));
        assert!(collect_stream(stream).await.is_err());
    }
}
