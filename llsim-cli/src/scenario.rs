//! Scenario files
//!
//! ```toml
//! name = "flea-market"
//! ticks = 5
//!
//! [model]
//! seed = 7
//! parallel = true
//! tick_timeout_ms = 60000
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 250
//!
//! [[agents]]
//! name = "seller"
//! role_prompt = "You sell one vintage bicycle."
//! backend = { provider = "ollama", model = "llama3.1" }
//! initial_state = { min_price = 60 }
//! actions = ["offer", "speak_to"]
//! ```

use anyhow::{bail, Context, Result};
use llsim_agent::{ActionCatalog, AgentSpec, LlmAgent, Model, ModelConfig};
use llsim_llm::{BackendRegistry, RetryPolicy};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

fn default_ticks() -> u64 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    pub agents: Vec<AgentSpec>,
}

impl Scenario {
    /// Load and validate a scenario file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to load {}", path.as_ref().display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let scenario: Scenario = toml::from_str(content).context("Invalid scenario TOML")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agents.is_empty() {
            bail!("scenario has no agents");
        }
        let mut names = HashSet::new();
        for spec in &self.agents {
            spec.validate()?;
            if !names.insert(spec.name.as_str()) {
                bail!("agent name '{}' is used twice", spec.name);
            }
        }
        Ok(())
    }

    /// Resolve every agent and register it with a new model
    pub fn build(&self, registry: &BackendRegistry, catalog: &ActionCatalog) -> Result<Model> {
        let mut model = Model::new(self.model.clone());
        for spec in &self.agents {
            model
                .try_add_agent(|id| LlmAgent::from_spec(id, spec, registry, catalog))
                .with_context(|| format!("Failed to build agent '{}'", spec.name))?;
        }
        Ok(model)
    }
}
