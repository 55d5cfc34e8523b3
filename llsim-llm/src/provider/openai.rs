//! OpenAI-compatible provider implementation
//!
//! Works with OpenAI, Ollama, vLLM, OpenRouter, Groq, and other servers that
//! speak the chat-completions dialect.

use super::*;
use crate::error::{from_reqwest, from_status, malformed_json, retry_after_secs};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI-compatible provider
pub struct OpenAIProvider {
    client: Client,
    config: ProviderConfig,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| {
                Error::config_invalid("failed to create HTTP client")
                    .with_operation("openai::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
    }
}

#[async_trait]
impl Backend for OpenAIProvider {
    fn name(&self) -> &str {
        self.config.kind.as_str()
    }

    fn default_model(&self) -> &str {
        self.config.default_model.as_deref().unwrap_or("gpt-4o-mini")
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse> {
        let model = request.model.as_deref().unwrap_or(self.default_model());

        let api_request = OpenAIRequest {
            model: model.to_string(),
            messages: request.messages.iter().map(OpenAIMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: Some(false),
        };

        debug!(provider = self.name(), model, messages = api_request.messages.len(), "sending chat completion");

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url()))
            .json(&api_request);

        if let Some(api_key) = &self.config.api_key {
            if !api_key.is_empty() {
                req = req.header("Authorization", format!("Bearer {}", api_key));
            }
        }

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req
            .send()
            .await
            .map_err(|e| from_reqwest(e, "openai::send").with_context("model", model))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = retry_after_secs(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(from_status(status, text, retry_after, "openai::send")
                .with_context("model", model));
        }

        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(e, "openai::send"))?;
        let api_response: OpenAIResponse =
            serde_json::from_str(&body).map_err(|e| malformed_json(e, "openai::send"))?;

        let choice = api_response.choices.into_iter().next().ok_or_else(|| {
            Error::malformed_response("no choices in response").with_operation("openai::send")
        })?;

        let content = choice
            .message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                Error::malformed_response("empty message content")
                    .with_operation("openai::send")
                    .with_context("finish_reason", choice.finish_reason.unwrap_or_default())
            })?;

        let usage = api_response
            .usage
            .map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(BackendResponse {
            model: api_response.model.unwrap_or_else(|| model.to_string()),
            content,
            usage,
        })
    }
}

// ============================================================================
// OpenAI API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

impl From<&ChatMessage> for OpenAIMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().into(),
            content: Some(msg.content.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}
