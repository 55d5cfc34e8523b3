//! Plan execution
//!
//! An agent's capability set is an [`ActionSet`]: the handlers its plans may
//! name. The [`PlanExecutor`] looks the plan's action up, runs the handler
//! against a scratch copy of the agent's state, and commits only on success.
//! Every application yields exactly one memory entry, whatever the outcome.

use crate::environment::{Environment, Message};
use crate::memory::MemoryEntry;
use crate::plan::{Action, Plan, NOOP};
use crate::state::{AgentId, InternalState};
use llsim_error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Salience given to successful steps
pub const SUCCESS_SALIENCE: f32 = 0.5;
/// Salience given to failed steps, kept high so failures survive consolidation
pub const FAILURE_SALIENCE: f32 = 0.9;

/// What a handler may touch: its own agent's state and the shared environment
pub struct ActionContext<'a> {
    pub agent_id: AgentId,
    pub agent_name: &'a str,
    pub step: u64,
    pub state: &'a mut InternalState,
    pub env: &'a mut Environment,
}

/// One named capability
pub trait ActionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// One line shown to the model, including the expected args
    fn description(&self) -> &str;

    fn apply(&self, ctx: &mut ActionContext<'_>, args: &Map<String, Value>) -> Result<String>;
}

// ============================================================================
// Argument helpers
// ============================================================================

pub fn arg_str<'a>(action: &str, args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| {
        Error::action_failed(action, format!("missing string argument '{}'", key))
            .with_context("arg", key.to_string())
    })
}

pub fn arg_f64(action: &str, args: &Map<String, Value>, key: &str) -> Result<f64> {
    args.get(key).and_then(Value::as_f64).ok_or_else(|| {
        Error::action_failed(action, format!("missing numeric argument '{}'", key))
            .with_context("arg", key.to_string())
    })
}

// ============================================================================
// Built-in handlers
// ============================================================================

/// Write keys into the agent's own state
#[derive(Debug, Clone, Copy, Default)]
pub struct SetState;

impl ActionHandler for SetState {
    fn name(&self) -> &str {
        "set_state"
    }

    fn description(&self) -> &str {
        "Update your own notes/state. args: {\"<key>\": <value>, ...}"
    }

    fn apply(&self, ctx: &mut ActionContext<'_>, args: &Map<String, Value>) -> Result<String> {
        if args.is_empty() {
            return Err(Error::action_failed(self.name(), "nothing to set"));
        }
        for (key, value) in args {
            ctx.state.insert(key.clone(), value.clone());
        }
        let keys: Vec<&str> = args.keys().map(String::as_str).collect();
        Ok(format!("updated {}", keys.join(", ")))
    }
}

/// Send a message to other agents, delivered at the end of the tick
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeakTo;

impl SpeakTo {
    fn recipients(&self, ctx: &ActionContext<'_>, to: &Value) -> Result<Vec<(AgentId, String)>> {
        let names: Vec<&str> = match to {
            Value::String(name) if name == "all" || name == "everyone" => {
                return Ok(ctx
                    .env
                    .agents()
                    .filter(|(id, _)| *id != ctx.agent_id)
                    .map(|(id, name)| (id, name.to_string()))
                    .collect());
            }
            Value::String(name) => vec![name.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };

        if names.is_empty() {
            return Err(Error::action_failed(self.name(), "'to' must name at least one agent"));
        }

        names
            .into_iter()
            .map(|name| match ctx.env.resolve(name) {
                Some(id) => Ok((id, name.to_string())),
                None => Err(Error::action_failed(self.name(), format!("no agent named '{}'", name))
                    .with_context("recipient", name.to_string())),
            })
            .collect()
    }
}

impl ActionHandler for SpeakTo {
    fn name(&self) -> &str {
        "speak_to"
    }

    fn description(&self) -> &str {
        "Send a message. args: {\"to\": \"<agent name>\" | [names] | \"all\", \"message\": \"<text>\"}"
    }

    fn apply(&self, ctx: &mut ActionContext<'_>, args: &Map<String, Value>) -> Result<String> {
        let content = arg_str(self.name(), args, "message")?.to_string();
        let to = args.get("to").cloned().unwrap_or(Value::Null);
        let recipients = self.recipients(ctx, &to)?;

        let mut names = Vec::with_capacity(recipients.len());
        for (id, name) in recipients {
            ctx.env.send(Message {
                step: ctx.step,
                from: ctx.agent_id,
                from_name: ctx.agent_name.to_string(),
                to: id,
                content: content.clone(),
            });
            names.push(name);
        }
        Ok(format!("sent to {}", names.join(", ")))
    }
}

/// Write a key on the shared board
#[derive(Debug, Clone, Copy, Default)]
pub struct Post;

impl ActionHandler for Post {
    fn name(&self) -> &str {
        "post"
    }

    fn description(&self) -> &str {
        "Write to the shared board everyone sees. args: {\"key\": \"<key>\", \"value\": <any>}"
    }

    fn apply(&self, ctx: &mut ActionContext<'_>, args: &Map<String, Value>) -> Result<String> {
        let key = arg_str(self.name(), args, "key")?.to_string();
        let value = args.get("value").cloned().unwrap_or(Value::Null);
        ctx.env.post(key.clone(), value);
        Ok(format!("posted {}", key))
    }
}

// ============================================================================
// Capability sets
// ============================================================================

/// The actions one agent may take, in the order they are shown to the model
#[derive(Clone, Default)]
pub struct ActionSet {
    handlers: Vec<Arc<dyn ActionHandler>>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.insert(Arc::new(handler));
        self
    }

    /// Add a handler, replacing one with the same name
    pub fn insert(&mut self, handler: Arc<dyn ActionHandler>) {
        match self.handlers.iter().position(|h| h.name() == handler.name()) {
            Some(i) => self.handlers[i] = handler,
            None => self.handlers.push(handler),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.iter().find(|h| h.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        name == NOOP || self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|h| h.name())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Prompt listing; `noop` is always available
    pub fn render(&self) -> String {
        let mut lines = vec![format!("- {}: Do nothing this step. args: {{}}", NOOP)];
        lines.extend(
            self.handlers
                .iter()
                .map(|h| format!("- {}: {}", h.name(), h.description())),
        );
        lines.join("\n")
    }
}

impl fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Every action known to a run, by name. Agent specs pick from it.
#[derive(Clone)]
pub struct ActionCatalog {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionCatalog {
    /// An empty catalog
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in actions: `set_state`, `speak_to` and `post`
    pub fn builtin() -> Self {
        Self::empty().with(SetState).with(SpeakTo).with(Post)
    }

    pub fn with(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.register(Arc::new(handler));
        self
    }

    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(name)
    }

    /// Sorted names
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build a capability set. Unknown names are a configuration error.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Result<ActionSet> {
        let mut set = ActionSet::new();
        for name in names {
            let name = name.as_ref();
            if name == NOOP {
                continue;
            }
            let handler = self.handlers.get(name).ok_or_else(|| {
                Error::config_invalid(format!("action '{}' is not in the catalog", name))
                    .with_operation("catalog::resolve")
                    .with_context("action", name.to_string())
                    .with_context("known", self.names().join(","))
            })?;
            set.insert(handler.clone());
        }
        Ok(set)
    }
}

impl Default for ActionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Applies plans against one agent's capability set
#[derive(Debug, Clone, Default)]
pub struct PlanExecutor {
    actions: ActionSet,
}

impl PlanExecutor {
    pub fn new(actions: ActionSet) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &ActionSet {
        &self.actions
    }

    /// Apply a plan. The memory entry is produced on both arms and always
    /// carries the plan's reasoning.
    pub fn apply(&self, plan: Plan, ctx: &mut ActionContext<'_>) -> (MemoryEntry, Result<String>) {
        let Plan { reasoning, action } = plan;
        let result = self.dispatch(&action, ctx);

        let entry = match &result {
            Ok(outcome) => MemoryEntry::action(
                ctx.step,
                format!("{}\n-> {}: {}", reasoning.trim(), action, outcome),
            )
            .with_salience(SUCCESS_SALIENCE),
            Err(err) => MemoryEntry::action(
                ctx.step,
                format!("{}\n-> {} failed: {}", reasoning.trim(), action, err.message()),
            )
            .with_salience(FAILURE_SALIENCE),
        };
        (entry, result)
    }

    fn dispatch(&self, action: &Action, ctx: &mut ActionContext<'_>) -> Result<String> {
        if action.is_noop() {
            return Ok("waited".to_string());
        }

        let handler = self.actions.get(&action.name).ok_or_else(|| {
            Error::unknown_action(action.name.clone())
                .with_operation("executor::apply")
                .with_context("agent", ctx.agent_id.to_string())
        })?;

        let mut scratch = ctx.state.clone();
        let checkpoint = ctx.env.checkpoint();
        let outcome = {
            let mut scoped = ActionContext {
                agent_id: ctx.agent_id,
                agent_name: ctx.agent_name,
                step: ctx.step,
                state: &mut scratch,
                env: &mut *ctx.env,
            };
            handler.apply(&mut scoped, &action.args)
        };

        match outcome {
            Ok(outcome) => {
                *ctx.state = scratch;
                debug!(agent = %ctx.agent_id, action = %action.name, "action applied");
                Ok(outcome)
            }
            Err(err) => {
                ctx.env.rollback(checkpoint);
                Err(err
                    .with_operation("executor::apply")
                    .with_context("agent", ctx.agent_id.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKind;
    use llsim_error::ErrorKind;
    use serde_json::json;

    /// Writes a state key, then fails
    struct HalfDone;

    impl ActionHandler for HalfDone {
        fn name(&self) -> &str {
            "half_done"
        }

        fn description(&self) -> &str {
            "fails after writing"
        }

        fn apply(&self, ctx: &mut ActionContext<'_>, _args: &Map<String, Value>) -> Result<String> {
            ctx.state.insert("touched", true);
            ctx.env.post("touched", json!(true));
            Err(Error::action_failed(self.name(), "gave up"))
        }
    }

    fn env() -> Environment {
        let mut env = Environment::new();
        env.register(AgentId(0), "seller");
        env.register(AgentId(1), "buyer-1");
        env.register(AgentId(2), "buyer-2");
        env
    }

    fn plan(name: &str, args: Value) -> Plan {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Plan::new("because", Action { name: name.into(), args })
    }

    #[test]
    fn test_set_state_commits() {
        let executor = PlanExecutor::new(ActionSet::new().with(SetState));
        let mut state = InternalState::new().with("budget", 100);
        let mut env = env();
        let mut ctx = ActionContext {
            agent_id: AgentId(1),
            agent_name: "buyer-1",
            step: 1,
            state: &mut state,
            env: &mut env,
        };

        let (entry, result) = executor.apply(plan("set_state", json!({ "mood": "eager" })), &mut ctx);
        assert_eq!(result.unwrap(), "updated mood");
        assert_eq!(entry.kind, MemoryKind::Action);
        assert!(entry.content.starts_with("because\n-> set_state"));
        assert_eq!(state.get("mood"), Some(&json!("eager")));
    }

    #[test]
    fn test_unknown_action_keeps_reasoning() {
        let executor = PlanExecutor::new(ActionSet::new().with(SetState));
        let mut state = InternalState::new().with("budget", 100);
        let before = state.clone();
        let mut env = env();
        let mut ctx = ActionContext {
            agent_id: AgentId(1),
            agent_name: "buyer-1",
            step: 4,
            state: &mut state,
            env: &mut env,
        };

        let (entry, result) = executor.apply(plan("fly", json!({})), &mut ctx);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownAction);
        assert_eq!(err.context_value("action"), Some("fly"));
        assert_eq!(entry.step, 4);
        assert!(entry.content.contains("because"));
        assert!(entry.content.contains("fly failed"));
        assert_eq!(state, before);
    }

    #[test]
    fn test_failed_handler_rolls_back() {
        let executor = PlanExecutor::new(ActionSet::new().with(HalfDone));
        let mut state = InternalState::new();
        let mut env = env();
        let mut ctx = ActionContext {
            agent_id: AgentId(0),
            agent_name: "seller",
            step: 1,
            state: &mut state,
            env: &mut env,
        };

        let (entry, result) = executor.apply(plan("half_done", json!({})), &mut ctx);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ActionFailed);
        assert_eq!(entry.salience, Some(FAILURE_SALIENCE));
        assert!(state.is_empty());
        assert!(env.board().is_empty());
    }

    #[test]
    fn test_speak_to_queues_messages() {
        let executor = PlanExecutor::new(ActionSet::new().with(SpeakTo));
        let mut state = InternalState::new();
        let mut env = env();
        let mut ctx = ActionContext {
            agent_id: AgentId(0),
            agent_name: "seller",
            step: 2,
            state: &mut state,
            env: &mut env,
        };

        let (_, result) = executor.apply(
            plan("speak_to", json!({ "to": "all", "message": "price is 90" })),
            &mut ctx,
        );
        assert_eq!(result.unwrap(), "sent to buyer-1, buyer-2");

        let (_, result) = executor.apply(
            plan("speak_to", json!({ "to": ["nobody"], "message": "hi" })),
            &mut ctx,
        );
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ActionFailed);

        let queued = env.pending_messages();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].to, AgentId(1));
        assert_eq!(queued[1].render(), "seller said: price is 90");
    }

    #[test]
    fn test_noop_always_available() {
        let executor = PlanExecutor::default();
        let mut state = InternalState::new();
        let mut env = env();
        let mut ctx = ActionContext {
            agent_id: AgentId(0),
            agent_name: "seller",
            step: 1,
            state: &mut state,
            env: &mut env,
        };

        let (_, result) = executor.apply(Plan::noop("waiting"), &mut ctx);
        assert_eq!(result.unwrap(), "waited");
    }

    #[test]
    fn test_catalog_resolve() {
        let catalog = ActionCatalog::builtin();
        let set = catalog.resolve(&["speak_to", "post", "noop"]).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["speak_to", "post"]);
        assert!(set.contains("noop"));
        assert!(set.render().starts_with("- noop:"));

        let err = catalog.resolve(&["teleport"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(err.context_value("action"), Some("teleport"));
    }
}
