//! Agents - observe, deliberate, act
//!
//! The model drives every agent through three calls per tick:
//! 1. `observe` takes a snapshot of the environment and the agent's state
//! 2. `deliberate` asks the reasoning engine for a plan (the only await)
//! 3. `act` applies the plan, updates memory and returns the step record
//!
//! Splitting the cycle lets the model run all deliberations concurrently and
//! still apply their effects one by one in activation order.

use crate::action::{ActionCatalog, ActionContext, ActionSet, PlanExecutor, FAILURE_SALIENCE};
use crate::environment::{Environment, Message};
use crate::memory::{Memory, MemoryConfig, MemoryEntry, MemoryKind};
use crate::observation::Observation;
use crate::plan::Plan;
use crate::reasoning::{PlanFailure, ReasoningEngine, ReasoningStyle};
use crate::state::{AgentId, InternalState};
use crate::telemetry::{StepOutcome, StepRecord};
use async_trait::async_trait;
use llsim_error::{Error, Result};
use llsim_llm::{BackendRegistry, BackendSelection};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Salience given to messages from other agents
pub const MESSAGE_SALIENCE: f32 = 0.7;

/// The result of one deliberation, waiting to be applied
#[derive(Debug)]
pub struct Deliberation {
    pub step: u64,
    pub outcome: std::result::Result<Plan, PlanFailure>,
}

impl Deliberation {
    pub fn new(step: u64, outcome: std::result::Result<Plan, PlanFailure>) -> Self {
        Self { step, outcome }
    }

    /// The deliberation did not finish before the tick deadline
    pub fn timed_out(step: u64, agent: AgentId, after: Duration) -> Self {
        let error = Error::backend_timeout(format!(
            "no plan within the tick deadline of {} ms",
            after.as_millis()
        ))
        .with_operation("model::step")
        .with_context("agent", agent.to_string());
        Self::new(step, Err(PlanFailure::new(error)))
    }
}

/// Anything the model can schedule
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> AgentId;

    fn name(&self) -> &str;

    fn state(&self) -> &InternalState;

    fn memory(&self) -> &Memory;

    fn memory_mut(&mut self) -> &mut Memory;

    /// Snapshot for this step
    fn observe(&self, env: &Environment, step: u64) -> Observation;

    /// Produce a plan. Never fails; failures travel inside the deliberation.
    async fn deliberate(&self, observation: &Observation) -> Deliberation;

    /// Apply a deliberation. Appends exactly one memory entry.
    fn act(&mut self, deliberation: Deliberation, env: &mut Environment) -> StepRecord;

    /// Store a message delivered by the model
    fn receive(&mut self, message: &Message) {
        let entry =
            MemoryEntry::observation(message.step, message.render()).with_salience(MESSAGE_SALIENCE);
        if let Err(err) = self.memory_mut().append(entry) {
            warn!(agent = %self.id(), error = %err, "dropped incoming message");
        }
    }

    /// A whole cycle with no deadline
    async fn step(&mut self, env: &mut Environment, step: u64) -> StepRecord {
        let observation = self.observe(env, step);
        let deliberation = self.deliberate(&observation).await;
        self.act(deliberation, env)
    }
}

fn default_actions() -> Vec<String> {
    vec!["set_state".into(), "speak_to".into(), "post".into()]
}

/// Everything needed to build an [`LlmAgent`] from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub role_prompt: String,
    /// Instruction repeated in every observation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_prompt: Option<String>,
    #[serde(default)]
    pub reasoning: ReasoningStyle,
    pub backend: BackendSelection,
    #[serde(default)]
    pub initial_state: InternalState,
    #[serde(default = "default_actions")]
    pub actions: Vec<String>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl AgentSpec {
    pub fn new(
        name: impl Into<String>,
        role_prompt: impl Into<String>,
        backend: BackendSelection,
    ) -> Self {
        Self {
            name: name.into(),
            role_prompt: role_prompt.into(),
            step_prompt: None,
            reasoning: ReasoningStyle::default(),
            backend,
            initial_state: InternalState::default(),
            actions: default_actions(),
            memory: MemoryConfig::default(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_state(mut self, state: InternalState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn with_actions<S: Into<String>>(mut self, actions: impl IntoIterator<Item = S>) -> Self {
        self.actions = actions.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::config_invalid("agent name is empty").with_operation("spec::validate"));
        }
        if self.role_prompt.trim().is_empty() {
            return Err(Error::config_invalid("role prompt is empty")
                .with_operation("spec::validate")
                .with_context("agent", self.name.clone()));
        }
        if self.memory.short_term_capacity == 0 {
            return Err(Error::config_invalid("short_term_capacity must be at least 1")
                .with_operation("spec::validate")
                .with_context("agent", self.name.clone()));
        }
        Ok(())
    }
}

/// An agent whose decisions come from a language model
pub struct LlmAgent {
    id: AgentId,
    name: String,
    role_prompt: String,
    step_prompt: Option<String>,
    state: InternalState,
    memory: Memory,
    engine: ReasoningEngine,
    executor: PlanExecutor,
}

impl LlmAgent {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        role_prompt: impl Into<String>,
        engine: ReasoningEngine,
        actions: ActionSet,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            role_prompt: role_prompt.into(),
            step_prompt: None,
            state: InternalState::default(),
            memory: Memory::default(),
            engine,
            executor: PlanExecutor::new(actions),
        }
    }

    /// Build from a spec, resolving the backend and the action names.
    ///
    /// Fails with `UnsupportedBackend` for an unknown provider and with
    /// `ConfigInvalid` for unknown actions or a missing API key.
    pub fn from_spec(
        id: AgentId,
        spec: &AgentSpec,
        registry: &BackendRegistry,
        catalog: &ActionCatalog,
    ) -> Result<Self> {
        spec.validate()?;
        let backend = registry
            .resolve(&spec.backend)
            .map_err(|err| err.with_context("agent", spec.name.clone()))?;
        let actions = catalog
            .resolve(&spec.actions)
            .map_err(|err| err.with_context("agent", spec.name.clone()))?;

        let mut engine =
            ReasoningEngine::new(backend, spec.backend.model.clone()).with_style(spec.reasoning);
        if let Some(t) = spec.temperature {
            engine = engine.with_temperature(t);
        }
        if let Some(max) = spec.max_tokens {
            engine = engine.with_max_tokens(max);
        }

        Ok(Self::new(id, spec.name.clone(), spec.role_prompt.clone(), engine, actions)
            .with_state(spec.initial_state.clone())
            .with_memory(Memory::from_config(&spec.memory))
            .with_step_prompt(spec.step_prompt.clone()))
    }

    pub fn with_state(mut self, state: InternalState) -> Self {
        self.state = state;
        self
    }

    pub fn with_memory(mut self, memory: Memory) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_step_prompt(mut self, prompt: Option<String>) -> Self {
        self.step_prompt = prompt;
        self
    }

    pub fn role_prompt(&self) -> &str {
        &self.role_prompt
    }

    pub fn engine(&self) -> &ReasoningEngine {
        &self.engine
    }

    pub fn actions(&self) -> &ActionSet {
        self.executor.actions()
    }

    fn remember(&mut self, entry: MemoryEntry) {
        if let Err(err) = self.memory.append(entry) {
            warn!(agent = %self.id, error = %err, "memory entry rejected");
        }
    }
}

#[async_trait]
impl Agent for LlmAgent {
    fn id(&self) -> AgentId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &InternalState {
        &self.state
    }

    fn memory(&self) -> &Memory {
        &self.memory
    }

    fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    fn observe(&self, env: &Environment, step: u64) -> Observation {
        let inbox = self
            .memory
            .recent(Some(MemoryKind::Observation), self.memory.capacity())
            .into_iter()
            .filter(|entry| entry.step + 1 == step)
            .map(|entry| entry.content.clone())
            .collect();

        Observation::capture(self.id, &self.name, &self.state, env, step)
            .with_inbox(inbox)
            .with_prompt(self.step_prompt.clone())
    }

    async fn deliberate(&self, observation: &Observation) -> Deliberation {
        let query = observation.query();
        let memory: Vec<&MemoryEntry> = self
            .memory
            .retrieve(&query, self.memory.retrieve_k())
            .collect();

        let outcome = self
            .engine
            .plan(&self.role_prompt, observation, &memory, self.executor.actions())
            .await;
        if let Err(failure) = &outcome {
            debug!(agent = %self.id, step = observation.step, error = %failure, "no plan");
        }
        Deliberation::new(observation.step, outcome)
    }

    fn act(&mut self, deliberation: Deliberation, env: &mut Environment) -> StepRecord {
        let Deliberation { step, outcome } = deliberation;

        let (entry, reasoning, action, outcome) = match outcome {
            Ok(plan) => {
                let reasoning = plan.reasoning.clone();
                let action = plan.action.clone();
                let mut ctx = ActionContext {
                    agent_id: self.id,
                    agent_name: &self.name,
                    step,
                    state: &mut self.state,
                    env,
                };
                let (entry, result) = self.executor.apply(plan, &mut ctx);
                let outcome = match result {
                    Ok(result) => StepOutcome::Success { result },
                    Err(err) => StepOutcome::failed(&err),
                };
                (entry, reasoning, Some(action), outcome)
            }
            Err(failure) => {
                let outcome = StepOutcome::failed(&failure.error);
                let content = match &failure.raw {
                    Some(raw) => format!("{}\n-> no action: {}", raw.trim(), failure.error.message()),
                    None => format!("no plan: {}", failure.error.message()),
                };
                let entry = MemoryEntry::reasoning(step, content).with_salience(FAILURE_SALIENCE);
                (entry, failure.into_noop().reasoning, None, outcome)
            }
        };

        self.remember(entry);
        StepRecord {
            agent_id: self.id,
            agent_name: self.name.clone(),
            step,
            reasoning,
            action,
            outcome,
        }
    }
}
