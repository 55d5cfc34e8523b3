//! Process-wide backend registry.
//!
//! The host creates one registry, resolves every agent's selection through
//! it, and drops it when the run ends. Agents that pick the same
//! {provider, model, base_url} share one retry-wrapped instance and
//! therefore one connection pool.

use crate::provider::{
    AnthropicProvider, Backend, BackendSelection, OpenAIProvider, ProviderConfig, ProviderKind,
};
use crate::retry::{RetryPolicy, Retrying};
use llsim_error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RegistryKey {
    provider: ProviderKind,
    model: String,
    base_url: Option<String>,
}

/// Resolves selections to shared backend instances
pub struct BackendRegistry {
    policy: RetryPolicy,
    backends: Mutex<HashMap<RegistryKey, Arc<dyn Backend>>>,
    overrides: HashMap<ProviderKind, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            backends: Mutex::new(HashMap::new()),
            overrides: HashMap::new(),
        }
    }

    /// Route every selection of `provider` to the given instance instead of
    /// building a transport. Offline runs route all providers to a
    /// [`ScriptedBackend`](crate::provider::ScriptedBackend) this way.
    pub fn with_override(mut self, provider: ProviderKind, backend: Arc<dyn Backend>) -> Self {
        self.overrides.insert(provider, backend);
        self
    }

    /// Route every recognized provider to one instance
    pub fn with_override_all(mut self, backend: Arc<dyn Backend>) -> Self {
        for kind in ProviderKind::ALL {
            self.overrides.insert(kind, backend.clone());
        }
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Resolve a selection, building (and caching) the transport on first use.
    ///
    /// Fails with `UnsupportedBackend` for unknown providers and with
    /// `ConfigInvalid` when a hosted provider's key is missing.
    pub fn resolve(&self, selection: &BackendSelection) -> Result<Arc<dyn Backend>> {
        let provider = selection.kind()?;
        let key = RegistryKey {
            provider,
            model: selection.model.clone(),
            base_url: selection.base_url.clone(),
        };

        let mut backends = self
            .backends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = backends.get(&key) {
            return Ok(existing.clone());
        }

        let backend = self.build(provider, selection)?;
        info!(provider = %provider, model = %selection.model, "backend registered");
        backends.insert(key, backend.clone());
        Ok(backend)
    }

    /// Number of distinct backends built so far
    pub fn len(&self) -> usize {
        self.backends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build(&self, provider: ProviderKind, selection: &BackendSelection) -> Result<Arc<dyn Backend>> {
        if let Some(backend) = self.overrides.get(&provider) {
            return Ok(Arc::new(Retrying::new(backend.clone(), self.policy.clone())));
        }

        let backend: Arc<dyn Backend> = match provider {
            ProviderKind::Anthropic => {
                let config = ProviderConfig::from_selection(selection)?;
                Arc::new(Retrying::new(AnthropicProvider::new(config)?, self.policy.clone()))
            }
            ProviderKind::OpenAI
            | ProviderKind::Ollama
            | ProviderKind::Vllm
            | ProviderKind::OpenRouter
            | ProviderKind::Groq => {
                let config = ProviderConfig::from_selection(selection)?;
                Arc::new(Retrying::new(OpenAIProvider::new(config)?, self.policy.clone()))
            }
            ProviderKind::Scripted => {
                return Err(Error::config_invalid(
                    "the scripted provider needs an instance registered with with_override",
                )
                .with_operation("registry::resolve"));
            }
        };
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
