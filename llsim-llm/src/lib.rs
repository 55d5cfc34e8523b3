//! # llsim LLM
//!
//! The backend adapter layer: one request/response contract over
//! heterogeneous language-model providers.
//!
//! ## Core Concepts
//! - **Backend**: trait with a single `send` call; knows nothing about agents
//! - **Providers**: OpenAI-compatible servers (hosted or local), Anthropic,
//!   and an in-process scripted backend
//! - **Retrying**: bounded exponential backoff for transient failures
//! - **Registry**: resolves `{provider, model}` selections to shared instances

pub mod error;
pub mod provider;
pub mod registry;
pub mod retry;

pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use provider::{
    AnthropicProvider, Backend, BackendRequest, BackendResponse, BackendSelection, ChatMessage,
    OpenAIProvider, ProviderConfig, ProviderKind, Role, ScriptStep, ScriptedBackend, Usage,
};
pub use registry::BackendRegistry;
pub use retry::{RetryPolicy, Retrying};
