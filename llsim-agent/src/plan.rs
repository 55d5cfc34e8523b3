//! Plans - what an agent decided to do in one step

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Name of the sentinel action
pub const NOOP: &str = "noop";

/// A named action with JSON arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    pub fn noop() -> Self {
        Self::new(NOOP)
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn is_noop(&self) -> bool {
        self.name == NOOP
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} {}", self.name, Value::Object(self.args.clone()))
        }
    }
}

/// Reasoning text plus the chosen action.
///
/// Not `Clone`: the executor takes a plan by value, so a plan can be applied
/// at most once.
#[derive(Debug, PartialEq)]
pub struct Plan {
    pub reasoning: String,
    pub action: Action,
}

impl Plan {
    pub fn new(reasoning: impl Into<String>, action: Action) -> Self {
        Self {
            reasoning: reasoning.into(),
            action,
        }
    }

    /// The sentinel plan used when no real plan could be produced
    pub fn noop(reasoning: impl Into<String>) -> Self {
        Self::new(reasoning, Action::noop())
    }

    pub fn is_noop(&self) -> bool {
        self.action.is_noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_from_json_without_args() {
        let action: Action = serde_json::from_value(json!({ "name": "noop" })).unwrap();
        assert!(action.is_noop());
        assert!(action.args.is_empty());
    }

    #[test]
    fn test_action_display() {
        let action = Action::new("offer").with_arg("price", 85);
        assert_eq!(action.to_string(), r#"offer {"price":85}"#);
        assert_eq!(Action::noop().to_string(), "noop");
    }

    #[test]
    fn test_noop_plan_keeps_reasoning() {
        let plan = Plan::noop("backend down");
        assert!(plan.is_noop());
        assert_eq!(plan.reasoning, "backend down");
    }
}
