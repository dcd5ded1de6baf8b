//! OpenAI-compatible chat-completions client.

use super::{parse_reply, AssistantClient, AssistantError, AssistantReply, Prompt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            temperature: 0.2,
            max_tokens: 1500,
            timeout_seconds: 120,
        }
    }
}

/// Message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Result<String, AssistantError> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| AssistantError::InvalidResponse("response has no content".to_string()))
    }
}

/// Assistant backed by `POST {base_url}/chat/completions`.
pub struct OpenAiAssistant {
    config: OpenAiConfig,
    http_client: reqwest::Client,
}

impl OpenAiAssistant {
    pub fn new(config: OpenAiConfig) -> Result<Self, AssistantError> {
        info!(
            "Initializing assistant with model {} at {}",
            config.model, config.base_url
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AssistantError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_request<'a>(&'a self, prompt: &Prompt) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl AssistantClient for OpenAiAssistant {
    async fn complete(&self, prompt: &Prompt) -> Result<AssistantReply, AssistantError> {
        let request = self.build_request(prompt);
        debug!("Sending chat request ({} chars)", prompt.user.len());

        let mut builder = self.http_client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AssistantError::Unavailable(format!(
                    "Request timed out after {}s",
                    self.config.timeout_seconds
                ))
            } else if e.is_connect() {
                AssistantError::Unavailable(format!(
                    "Cannot connect to assistant at {}",
                    self.config.base_url
                ))
            } else {
                AssistantError::Unavailable(format!("Failed to send request: {}", e))
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let text = chat_response.into_text()?;
        Ok(parse_reply(&text))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
