//! Per-step snapshot of what one agent can see

use crate::environment::Environment;
use crate::state::{AgentId, InternalState};
use serde_json::Value;
use std::collections::BTreeMap;

/// Immutable snapshot handed to the reasoning engine. Never stored; the
/// step's outcome is what goes into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub step: u64,
    pub state: InternalState,
    pub board: BTreeMap<String, Value>,
    /// Names of the other agents
    pub peers: Vec<String>,
    /// Messages received since the agent's previous step
    pub inbox: Vec<String>,
    /// Per-step instruction, if the agent has one
    pub prompt: Option<String>,
}

impl Observation {
    pub fn capture(
        agent_id: AgentId,
        agent_name: &str,
        state: &InternalState,
        env: &Environment,
        step: u64,
    ) -> Self {
        Self {
            agent_id,
            agent_name: agent_name.to_string(),
            step,
            state: state.clone(),
            board: env.board().clone(),
            peers: env
                .agents()
                .filter(|(id, _)| *id != agent_id)
                .map(|(_, name)| name.to_string())
                .collect(),
            inbox: Vec::new(),
            prompt: None,
        }
    }

    pub fn with_inbox(mut self, inbox: Vec<String>) -> Self {
        self.inbox = inbox;
        self
    }

    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Text used as the memory retrieval query
    pub fn query(&self) -> String {
        let mut query = self.inbox.join(" ");
        if let Some(prompt) = &self.prompt {
            query.push(' ');
            query.push_str(prompt);
        }
        for key in self.board.keys() {
            query.push(' ');
            query.push_str(key);
        }
        query
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("Step: {}\n", self.step));
        out.push_str(&format!("You are: {}\n", self.agent_name));
        out.push_str("Your state:\n");
        out.push_str(&self.state.render());
        out.push_str("\nShared board:\n");
        if self.board.is_empty() {
            out.push_str("  (empty)");
        } else {
            let lines: Vec<String> = self
                .board
                .iter()
                .map(|(k, v)| format!("  {}: {}", k, v))
                .collect();
            out.push_str(&lines.join("\n"));
        }
        if !self.peers.is_empty() {
            out.push_str(&format!("\nOther agents: {}", self.peers.join(", ")));
        }
        if !self.inbox.is_empty() {
            out.push_str("\nMessages since your last turn:");
            for message in &self.inbox {
                out.push_str(&format!("\n  {}", message));
            }
        }
        if let Some(prompt) = &self.prompt {
            out.push_str(&format!("\nTask: {}", prompt));
        }
        out
    }
}
