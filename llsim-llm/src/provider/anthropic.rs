//! Anthropic Claude provider implementation

use super::*;
use crate::error::{from_reqwest, from_status, malformed_json, retry_after_secs};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Anthropic Claude provider
pub struct AnthropicProvider {
    client: Client,
    config: ProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs.unwrap_or(120)))
            .build()
            .map_err(|e| {
                Error::config_invalid("failed to create HTTP client")
                    .with_operation("anthropic::new")
                    .set_source(e)
            })?;

        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.anthropic.com/v1")
    }
}

/// Split the system prompt out of the message list; Anthropic takes it as a
/// top-level field. Multiple system messages are joined.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<AnthropicMessage>) {
    let mut system: Vec<&str> = Vec::new();
    let mut rest = Vec::new();
    for msg in messages {
        match msg.role {
            Role::System => system.push(&msg.content),
            Role::User | Role::Assistant => rest.push(AnthropicMessage::from(msg)),
        }
    }
    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    (system, rest)
}

#[async_trait]
impl Backend for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        self.config
            .default_model
            .as_deref()
            .unwrap_or("claude-3-5-haiku-20241022")
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse> {
        let model = request.model.as_deref().unwrap_or(self.default_model());
        let (system, messages) = split_system(&request.messages);

        let api_request = AnthropicRequest {
            model: model.to_string(),
            messages,
            system,
            max_tokens: request.max_tokens.unwrap_or(4096),
            temperature: request.temperature,
        };

        let api_key = self.config.api_key.as_ref().ok_or_else(|| {
            Error::backend_unavailable("no API key configured")
                .permanent()
                .with_operation("anthropic::send")
        })?;

        debug!(provider = "anthropic", model, messages = api_request.messages.len(), "sending messages request");

        let mut req = self
            .client
            .post(format!("{}/messages", self.base_url()))
            .header("x-api-key", api_key)
            .header("content-type", "application/json")
            .json(&api_request);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        let response = req
            .send()
            .await
            .map_err(|e| from_reqwest(e, "anthropic::send").with_context("model", model))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let retry_after = retry_after_secs(response.headers());
            let text = response.text().await.unwrap_or_default();
            // 529 is Anthropic's "overloaded"; it falls in the 5xx arm
            return Err(from_status(status, text, retry_after, "anthropic::send")
                .with_context("model", model));
        }

        let body = response
            .text()
            .await
            .map_err(|e| from_reqwest(e, "anthropic::send"))?;
        let api_response: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| malformed_json(e, "anthropic::send"))?;

        let content: String = api_response
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect();

        if content.trim().is_empty() {
            return Err(Error::malformed_response("no text content in response")
                .with_operation("anthropic::send")
                .with_context("stop_reason", api_response.stop_reason.unwrap_or_default()));
        }

        let usage = Usage {
            prompt_tokens: api_response.usage.input_tokens,
            completion_tokens: api_response.usage.output_tokens,
            total_tokens: api_response.usage.input_tokens + api_response.usage.output_tokens,
        };

        Ok(BackendResponse {
            model: api_response.model,
            content,
            usage,
        })
    }
}

// ============================================================================
// Anthropic API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

impl From<&ChatMessage> for AnthropicMessage {
    fn from(msg: &ChatMessage) -> Self {
        let role = match msg.role {
            Role::Assistant => "assistant",
            Role::User | Role::System => "user",
        };
        Self {
            role,
            content: msg.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system() {
        let (system, rest) = split_system(&[
            ChatMessage::system("you sell apples"),
            ChatMessage::user("observation"),
            ChatMessage::system("format contract"),
        ]);
        assert_eq!(system.as_deref(), Some("you sell apples\n\nformat contract"));
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].role, "user");
    }

    #[test]
    fn test_response_ignores_non_text_blocks() {
        let body = r#"{
            "id": "msg_1",
            "model": "claude-3-5-haiku-20241022",
            "content": [
                {"type": "text", "text": "<reasoning>x</reasoning>"},
                {"type": "tool_use", "id": "t1", "name": "n", "input": {}}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 3}
        }"#;
        let parsed: AnthropicResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.content.len(), 2);
        assert!(matches!(parsed.content[1], ContentBlock::Other));
    }
}
