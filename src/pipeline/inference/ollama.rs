use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerateRequest, InferenceClient, InferenceError};
use crate::config::InferenceConfig;

/// Ollama HTTP client using the non-streaming chat endpoint.
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InferenceError::ClientSetup(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_connect() {
            InferenceError::Unreachable(self.base_url.clone())
        } else if e.is_timeout() {
            InferenceError::Transport(format!("request timed out: {e}"))
        } else if e.is_decode() {
            InferenceError::MalformedResponse(e.to_string())
        } else {
            InferenceError::Transport(e.to_string())
        }
    }
}

/// Request body for Ollama /api/chat
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Response body from Ollama /api/chat
#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn probe(&self) -> Result<(), InferenceError> {
        let response = self
            .client
            .get(&self.base_url)
            .send()
            .await
            .map_err(|e| match self.map_send_error(e) {
                InferenceError::Transport(_) => InferenceError::Unreachable(self.base_url.clone()),
                other => other,
            })?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(InferenceError::Unreachable(format!(
                "{} (status {})",
                self.base_url,
                response.status().as_u16()
            )))
        }
    }

    async fn generate(&self, request: GenerateRequest<'_>) -> Result<String, InferenceError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = ChatRequest {
            model: request.model,
            messages: [ChatMessage {
                role: "user",
                content: request.prompt,
            }],
            stream: false,
            options: request.deterministic.then_some(ChatOptions { temperature: 0.0 }),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::MalformedResponse(e.to_string()))?;
        Ok(parsed.message.content)
    }
}
