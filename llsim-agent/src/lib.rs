//! # llsim Agent
//!
//! LLM-driven agents for agent-based models:
//! 1. The model shuffles its agents with a seeded generator each tick
//! 2. Every agent observes the shared environment and its own state
//! 3. The reasoning engine asks a backend for a plan (reasoning + action)
//! 4. The plan executor applies the action, in activation order
//! 5. Every step leaves exactly one memory entry and one telemetry record
//!
//! The backend is the brain, the executor is the body, memory is what
//! carries over from one tick to the next.

pub mod action;
pub mod agent;
pub mod environment;
pub mod memory;
pub mod model;
pub mod observation;
pub mod plan;
pub mod reasoning;
pub mod state;
pub mod telemetry;

pub use action::{
    ActionCatalog, ActionContext, ActionHandler, ActionSet, PlanExecutor, Post, SetState, SpeakTo,
};
pub use agent::{Agent, AgentSpec, Deliberation, LlmAgent};
pub use environment::{Environment, Message};
pub use memory::{
    Consolidator, ConsolidationConfig, Memory, MemoryConfig, MemoryEntry, MemoryKind, Relevance,
    RelevanceConfig,
};
pub use model::{Model, ModelConfig, ModelState, StopHandle, TickReport};
pub use observation::Observation;
pub use plan::{Action, Plan};
pub use reasoning::{parse_plan, PlanFailure, ReasoningEngine, ReasoningStyle};
pub use state::{AgentId, InternalState};
pub use telemetry::{JsonLinesSink, StepOutcome, StepRecord, TelemetrySink, TracingSink};
