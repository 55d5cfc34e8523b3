//! Shared environment structures
//!
//! Everything agents can see of each other lives here: a directory of agent
//! names, a key/value board, and an outbox of messages waiting for delivery.
//! The model mutates it in a single pass per tick, in activation order.

use crate::state::AgentId;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// A message from one agent to another, delivered at the end of the tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub step: u64,
    pub from: AgentId,
    pub from_name: String,
    pub to: AgentId,
    pub content: String,
}

impl Message {
    /// How the recipient remembers it
    pub fn render(&self) -> String {
        format!("{} said: {}", self.from_name, self.content)
    }
}

/// State restored when an action fails halfway
#[derive(Debug, Clone)]
pub struct EnvCheckpoint {
    board: BTreeMap<String, Value>,
    outbox_len: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    step: u64,
    directory: BTreeMap<AgentId, String>,
    board: BTreeMap<String, Value>,
    outbox: Vec<Message>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step currently being evaluated (0 before the first tick)
    pub fn step(&self) -> u64 {
        self.step
    }

    pub(crate) fn begin_step(&mut self, step: u64) {
        self.step = step;
    }

    pub(crate) fn register(&mut self, id: AgentId, name: impl Into<String>) {
        self.directory.insert(id, name.into());
    }

    /// Look up an agent by name
    pub fn resolve(&self, name: &str) -> Option<AgentId> {
        self.directory
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
    }

    pub fn name_of(&self, id: AgentId) -> Option<&str> {
        self.directory.get(&id).map(String::as_str)
    }

    /// All registered agents in id order
    pub fn agents(&self) -> impl Iterator<Item = (AgentId, &str)> {
        self.directory.iter().map(|(id, name)| (*id, name.as_str()))
    }

    pub fn board(&self) -> &BTreeMap<String, Value> {
        &self.board
    }

    pub fn board_get(&self, key: &str) -> Option<&Value> {
        self.board.get(key)
    }

    pub fn post(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.board.insert(key.into(), value)
    }

    pub fn unpost(&mut self, key: &str) -> Option<Value> {
        self.board.remove(key)
    }

    pub fn send(&mut self, message: Message) {
        self.outbox.push(message);
    }

    /// Messages queued this tick, in queue order
    pub fn pending_messages(&self) -> &[Message] {
        &self.outbox
    }

    pub(crate) fn take_outbox(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.outbox)
    }

    pub(crate) fn checkpoint(&self) -> EnvCheckpoint {
        EnvCheckpoint {
            board: self.board.clone(),
            outbox_len: self.outbox.len(),
        }
    }

    pub(crate) fn rollback(&mut self, checkpoint: EnvCheckpoint) {
        self.board = checkpoint.board;
        self.outbox.truncate(checkpoint.outbox_len);
    }
}
