//! # Backend Interface
//!
//! A trait-based abstraction for talking to language-model providers.
//!
//! ## Design
//! - `Backend` trait defines the one call every provider supports: `send`
//! - Implementations for OpenAI-compatible servers (OpenAI, Ollama, vLLM,
//!   OpenRouter, Groq), Anthropic, and an in-process scripted backend
//! - `BackendSelection` is the configuration-facing {provider, model} pair;
//!   `ProviderConfig` is what a concrete transport is built from

pub mod anthropic;
pub mod openai;
pub mod scripted;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAIProvider;
pub use scripted::{ScriptStep, ScriptedBackend};

use async_trait::async_trait;
use llsim_error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// ============================================================================
// Core Types
// ============================================================================

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Request parameters for a single backend call
#[derive(Debug, Clone, Default)]
pub struct BackendRequest {
    pub messages: Vec<ChatMessage>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl BackendRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Concatenated content of all messages with the given role
    pub fn content_of(&self, role: Role) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Response from a backend call
#[derive(Debug, Clone, Default)]
pub struct BackendResponse {
    pub model: String,
    pub content: String,
    pub usage: Usage,
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

// ============================================================================
// Backend Trait
// ============================================================================

/// The uniform call interface every provider implements.
///
/// Implementations hold no per-call state besides their connection pool, so
/// one instance can be shared by every agent that selects the same provider.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Provider name (e.g., "openai", "anthropic")
    fn name(&self) -> &str;

    /// Model used when a request does not name one
    fn default_model(&self) -> &str;

    /// Send a request and wait for the full response
    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse>;

    /// Simple prompt -> response helper
    async fn prompt(&self, prompt: &str) -> Result<String> {
        let request = BackendRequest::new(vec![ChatMessage::user(prompt)]);
        Ok(self.send(&request).await?.content)
    }
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn default_model(&self) -> &str {
        self.as_ref().default_model()
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse> {
        self.as_ref().send(request).await
    }
}

// ============================================================================
// Provider Selection & Configuration
// ============================================================================

/// Recognized providers.
///
/// Most hosted vendors and local inference servers speak the OpenAI
/// chat-completions dialect; they differ only in base URL and key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Ollama,
    Vllm,
    OpenRouter,
    Groq,
    Scripted,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 7] = [
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Ollama,
        ProviderKind::Vllm,
        ProviderKind::OpenRouter,
        ProviderKind::Groq,
        ProviderKind::Scripted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Vllm => "vllm",
            ProviderKind::OpenRouter => "openrouter",
            ProviderKind::Groq => "groq",
            ProviderKind::Scripted => "scripted",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAI => Some("https://api.openai.com/v1"),
            ProviderKind::Anthropic => Some("https://api.anthropic.com/v1"),
            ProviderKind::Ollama => Some("http://localhost:11434/v1"),
            ProviderKind::Vllm => Some("http://localhost:8000/v1"),
            ProviderKind::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderKind::Groq => Some("https://api.groq.com/openai/v1"),
            ProviderKind::Scripted => None,
        }
    }

    /// Environment variable holding the API key, if the provider needs one
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAI => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Groq => Some("GROQ_API_KEY"),
            ProviderKind::Ollama | ProviderKind::Vllm | ProviderKind::Scripted => None,
        }
    }

    /// Local inference servers get a longer default timeout
    pub fn is_local(&self) -> bool {
        matches!(self, ProviderKind::Ollama | ProviderKind::Vllm)
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| Error::unsupported_backend(s).with_operation("provider::parse"))
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The configuration-facing {provider, model} pair.
///
/// Also accepts the `provider/model` shorthand (e.g. `"openai/gpt-4o-mini"`)
/// through [`BackendSelection::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendSelection {
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl BackendSelection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            base_url: None,
            api_key_env: None,
        }
    }

    /// Parse `provider/model`. The model part may itself contain slashes.
    pub fn parse(spec: &str) -> Result<Self> {
        let (provider, model) = spec.split_once('/').ok_or_else(|| {
            Error::config_invalid(format!("expected 'provider/model', got '{}'", spec))
                .with_operation("selection::parse")
        })?;
        if model.is_empty() {
            return Err(Error::config_invalid("model identifier is empty")
                .with_operation("selection::parse")
                .with_context("selection", spec));
        }
        let selection = Self::new(provider, model);
        selection.kind()?;
        Ok(selection)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Resolve the provider name, failing fast on unknown providers
    pub fn kind(&self) -> Result<ProviderKind> {
        self.provider.parse()
    }
}

/// Configuration for creating providers
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
    pub headers: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    /// Build a transport configuration from a selection.
    ///
    /// Hosted providers need their API key present in the environment;
    /// a missing key is a configuration error, not a runtime one.
    pub fn from_selection(selection: &BackendSelection) -> Result<Self> {
        let kind = selection.kind()?;

        let key_env = selection
            .api_key_env
            .as_deref()
            .or_else(|| kind.default_api_key_env());
        let api_key = match key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                Error::config_invalid(format!("environment variable {} is not set", var))
                    .with_operation("provider::from_selection")
                    .with_context("provider", kind.as_str())
            })?),
            None => None,
        };

        let mut headers = HashMap::new();
        if kind == ProviderKind::Anthropic {
            headers.insert("anthropic-version".into(), "2023-06-01".into());
        }

        Ok(Self {
            kind,
            api_key,
            base_url: selection
                .base_url
                .clone()
                .or_else(|| kind.default_base_url().map(Into::into)),
            default_model: Some(selection.model.clone()),
            headers,
            timeout_secs: Some(if kind.is_local() { 300 } else { 120 }),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use llsim_error::ErrorKind;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are a seller");
        assert_eq!(sys.role, Role::System);
        assert_eq!(sys.content, "You are a seller");

        let user = ChatMessage::user("Hello");
        assert_eq!(user.role, Role::User);

        let asst = ChatMessage::assistant("Hi there!");
        assert_eq!(asst.role, Role::Assistant);
    }

    #[test]
    fn test_request_builder() {
        let request = BackendRequest::new(vec![
            ChatMessage::system("role"),
            ChatMessage::user("obs"),
        ])
        .with_model("gpt-4o")
        .with_temperature(0.7)
        .with_max_tokens(1000);

        assert_eq!(request.model, Some("gpt-4o".into()));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.content_of(Role::User), "obs");
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAI);
        assert_eq!(" Ollama ".parse::<ProviderKind>().unwrap(), ProviderKind::Ollama);

        let err = "watsonx".parse::<ProviderKind>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedBackend);
    }

    #[test]
    fn test_selection_parse() {
        let sel = BackendSelection::parse("openrouter/meta-llama/llama-3-8b").unwrap();
        assert_eq!(sel.provider, "openrouter");
        assert_eq!(sel.model, "meta-llama/llama-3-8b");

        let err = BackendSelection::parse("gpt-4o").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        let err = BackendSelection::parse("mystery/model").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedBackend);
    }

    #[test]
    fn test_config_from_anthropic_selection() {
        std::env::set_var("LLSIM_TEST_ANTHROPIC_KEY", "sk-ant-test");
        let mut selection = BackendSelection::new("anthropic", "claude-3-5-haiku");
        selection.api_key_env = Some("LLSIM_TEST_ANTHROPIC_KEY".into());

        let config = ProviderConfig::from_selection(&selection).unwrap();
        assert_eq!(config.kind, ProviderKind::Anthropic);
        assert_eq!(config.api_key.as_deref(), Some("sk-ant-test"));
        assert_eq!(config.base_url.as_deref(), ProviderKind::Anthropic.default_base_url());
        assert!(config.headers.contains_key("anthropic-version"));
        assert_eq!(config.timeout_secs, Some(120));
    }

    #[test]
    fn test_config_from_local_selection_needs_no_key() {
        let selection = BackendSelection::new("ollama", "llama3")
            .with_base_url("http://gpu-box:11434/v1");
        let config = ProviderConfig::from_selection(&selection).unwrap();

        assert_eq!(config.kind, ProviderKind::Ollama);
        assert!(config.api_key.is_none());
        assert_eq!(config.base_url.as_deref(), Some("http://gpu-box:11434/v1"));
        assert_eq!(config.default_model.as_deref(), Some("llama3"));
        assert_eq!(config.timeout_secs, Some(300));
    }

    #[test]
    fn test_config_from_selection_missing_key() {
        let mut selection = BackendSelection::new("openai", "gpt-4o-mini");
        selection.api_key_env = Some("LLSIM_TEST_KEY_THAT_IS_NEVER_SET".into());

        let err = ProviderConfig::from_selection(&selection).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
