//! Reasoning engine - turns an observation plus memory into a plan
//!
//! One backend call per step. The request carries the role prompt and a
//! format contract (system message) and the observation, retrieved memory
//! and available actions (user message). The reply must contain exactly one
//! `<reasoning>` block and exactly one `<action>` block holding JSON.
//! Anything else is a parse failure; no action is guessed.

use crate::action::ActionSet;
use crate::memory::MemoryEntry;
use crate::observation::Observation;
use crate::plan::{Action, Plan};
use llsim_error::{Error, ErrorKind, Result};
use llsim_llm::{Backend, BackendRequest, ChatMessage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const REASONING_OPEN: &str = "<reasoning>";
const REASONING_CLOSE: &str = "</reasoning>";
const ACTION_OPEN: &str = "<action>";
const ACTION_CLOSE: &str = "</action>";

/// How the model is asked to think before acting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStyle {
    /// Think, then pick exactly one action
    #[default]
    #[serde(rename = "react")]
    ReAct,
    /// Work through numbered steps before choosing
    ChainOfThought,
}

impl ReasoningStyle {
    fn instructions(&self) -> &'static str {
        match self {
            ReasoningStyle::ReAct => {
                "Think about the situation, then choose exactly one action."
            }
            ReasoningStyle::ChainOfThought => {
                "Inside the reasoning block, work through the situation as a numbered list \
                 of short steps (1., 2., 3., ...) before choosing exactly one action."
            }
        }
    }
}

/// A step that produced no usable plan
#[derive(Debug)]
pub struct PlanFailure {
    pub error: Error,
    /// The backend reply, when one arrived
    pub raw: Option<String>,
}

impl PlanFailure {
    pub fn new(error: Error) -> Self {
        Self { error, raw: None }
    }

    pub fn with_raw(error: Error, raw: impl Into<String>) -> Self {
        Self {
            error,
            raw: Some(raw.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// The sentinel plan. Its reasoning is the raw reply, or the error message
    /// when nothing came back.
    pub fn into_noop(self) -> Plan {
        match self.raw {
            Some(raw) => Plan::noop(raw),
            None => Plan::noop(self.error.message().to_string()),
        }
    }
}

impl fmt::Display for PlanFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

/// Builds requests, sends them through a backend and parses the reply
#[derive(Clone)]
pub struct ReasoningEngine {
    backend: Arc<dyn Backend>,
    model: String,
    style: ReasoningStyle,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
}

impl ReasoningEngine {
    pub fn new(backend: Arc<dyn Backend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            style: ReasoningStyle::default(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_style(mut self, style: ReasoningStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn style(&self) -> ReasoningStyle {
        self.style
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// System message: role prompt plus the reply format contract
    pub fn system_prompt(&self, role_prompt: &str) -> String {
        format!(
            "{role}\n\n{style}\n\nReply with exactly two blocks and nothing else:\n\
             {ro}your reasoning{rc}\n\
             {ao}{{\"name\": \"<action name>\", \"args\": {{...}}}}{ac}\n\
             The action block must hold a single JSON object naming one of the available actions.",
            role = role_prompt.trim(),
            style = self.style.instructions(),
            ro = REASONING_OPEN,
            rc = REASONING_CLOSE,
            ao = ACTION_OPEN,
            ac = ACTION_CLOSE,
        )
    }

    /// User message: observation, retrieved memory and the action list
    pub fn user_prompt(
        &self,
        observation: &Observation,
        memory: &[&MemoryEntry],
        actions: &ActionSet,
    ) -> String {
        let mut out = String::from("## Observation\n");
        out.push_str(&observation.render());
        out.push_str("\n\n## Memory\n");
        if memory.is_empty() {
            out.push_str("(nothing yet)");
        } else {
            let lines: Vec<String> = memory
                .iter()
                .map(|e| format!("[step {}] {}: {}", e.step, e.kind, e.content.replace('\n', " ")))
                .collect();
            out.push_str(&lines.join("\n"));
        }
        out.push_str("\n\n## Available actions\n");
        out.push_str(&actions.render());
        out
    }

    pub fn request(
        &self,
        role_prompt: &str,
        observation: &Observation,
        memory: &[&MemoryEntry],
        actions: &ActionSet,
    ) -> BackendRequest {
        let mut request = BackendRequest::new(vec![
            ChatMessage::system(self.system_prompt(role_prompt)),
            ChatMessage::user(self.user_prompt(observation, memory, actions)),
        ])
        .with_model(self.model.clone());
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }
        if let Some(max) = self.max_tokens {
            request = request.with_max_tokens(max);
        }
        request
    }

    /// Produce a plan for one step.
    ///
    /// Backend errors arrive here after the adapter's own retries. Parse
    /// failures keep the raw reply.
    pub async fn plan(
        &self,
        role_prompt: &str,
        observation: &Observation,
        memory: &[&MemoryEntry],
        actions: &ActionSet,
    ) -> std::result::Result<Plan, PlanFailure> {
        let request = self.request(role_prompt, observation, memory, actions);

        let response = self.backend.send(&request).await.map_err(|err| {
            PlanFailure::new(
                err.with_operation("reasoning::plan")
                    .with_context("agent", observation.agent_id.to_string()),
            )
        })?;

        debug!(
            agent = %observation.agent_id,
            step = observation.step,
            chars = response.content.len(),
            "backend reply received"
        );

        match parse_plan(&response.content) {
            Ok(plan) => Ok(plan),
            Err(err) => Err(PlanFailure::with_raw(
                err.with_context("agent", observation.agent_id.to_string()),
                response.content,
            )),
        }
    }
}

impl fmt::Debug for ReasoningEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningEngine")
            .field("backend", &self.backend.name())
            .field("model", &self.model)
            .field("style", &self.style)
            .finish()
    }
}

/// The text between the only `open`/`close` pair in `content`
fn single_block<'a>(content: &'a str, open: &str, close: &str) -> Result<&'a str> {
    let opens = content.matches(open).count();
    let closes = content.matches(close).count();
    if opens != 1 || closes != 1 {
        return Err(Error::parse_failure(format!(
            "expected exactly one {}...{} block, found {} opening and {} closing tags",
            open, close, opens, closes
        ))
        .with_operation("reasoning::parse"));
    }

    let start = content.find(open).map(|i| i + open.len()).unwrap_or(0);
    let end = content.find(close).unwrap_or(0);
    if end < start {
        return Err(Error::parse_failure(format!("{} closes before it opens", open))
            .with_operation("reasoning::parse"));
    }
    Ok(content[start..end].trim())
}

/// Drop a surrounding markdown code fence, if any
fn strip_fence(body: &str) -> &str {
    if body.contains("```json") {
        body.split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .unwrap_or(body)
    } else if body.contains("```") {
        body.split("```").nth(1).map(|s| s.trim()).unwrap_or(body)
    } else {
        body.trim()
    }
}

/// Parse a reply into a plan
pub fn parse_plan(content: &str) -> Result<Plan> {
    let reasoning = single_block(content, REASONING_OPEN, REASONING_CLOSE)?;
    let body = strip_fence(single_block(content, ACTION_OPEN, ACTION_CLOSE)?);

    let action: Action = serde_json::from_str(body).map_err(|err| {
        Error::parse_failure(format!("action block is not a valid action object: {}", err))
            .with_operation("reasoning::parse")
            .set_source(err)
    })?;

    if action.name.trim().is_empty() {
        return Err(Error::parse_failure("action name is empty").with_operation("reasoning::parse"));
    }

    Ok(Plan::new(reasoning, action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionSet, SpeakTo};
    use crate::environment::Environment;
    use crate::state::{AgentId, InternalState};
    use llsim_llm::{RetryPolicy, Retrying, Role, ScriptedBackend};
    use serde_json::json;
    use std::time::Duration;

    const GOOD: &str = r#"<reasoning>The buyer can afford it.</reasoning>
<action>{"name": "speak_to", "args": {"to": "seller", "message": "deal"}}</action>"#;

    fn observation() -> Observation {
        let mut env = Environment::new();
        env.register(AgentId(0), "seller");
        env.register(AgentId(1), "buyer-1");
        Observation::capture(AgentId(1), "buyer-1", &InternalState::new().with("budget", 100), &env, 1)
    }

    #[test]
    fn test_parse_plan() {
        let plan = parse_plan(GOOD).unwrap();
        assert_eq!(plan.reasoning, "The buyer can afford it.");
        assert_eq!(plan.action.name, "speak_to");
        assert_eq!(plan.action.args.get("message"), Some(&json!("deal")));
    }

    #[test]
    fn test_parse_fenced_action() {
        let reply = "<reasoning>wait</reasoning>\n<action>\n```json\n{\"name\": \"noop\"}\n```\n</action>";
        let plan = parse_plan(reply).unwrap();
        assert!(plan.is_noop());
    }

    #[test]
    fn test_parse_missing_action_block() {
        let err = parse_plan("<reasoning>I think I should buy</reasoning> buy it").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
    }

    #[test]
    fn test_parse_rejects_two_actions() {
        let reply = "<reasoning>x</reasoning><action>{\"name\":\"a\"}</action><action>{\"name\":\"b\"}</action>";
        assert_eq!(parse_plan(reply).unwrap_err().kind(), ErrorKind::ParseFailure);
    }

    #[test]
    fn test_parse_rejects_bad_json() {
        let reply = "<reasoning>x</reasoning><action>buy now</action>";
        let err = parse_plan(reply).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
        assert!(err.source_ref().is_some());
    }

    #[test]
    fn test_prompt_layout() {
        let engine = ReasoningEngine::new(Arc::new(ScriptedBackend::new()), "demo")
            .with_style(ReasoningStyle::ChainOfThought);
        let actions = ActionSet::new().with(SpeakTo);
        let request = engine.request("You are a buyer.", &observation(), &[], &actions);

        assert_eq!(request.messages.len(), 2);
        let system = request.content_of(Role::System);
        assert!(system.starts_with("You are a buyer."));
        assert!(system.contains("numbered list"));
        assert!(system.contains("<action>"));

        let user = request.content_of(Role::User);
        assert!(user.contains("## Observation\nStep: 1"));
        assert!(user.contains("(nothing yet)"));
        assert!(user.contains("- speak_to:"));
    }

    #[tokio::test]
    async fn test_plan_success() {
        let engine = ReasoningEngine::new(Arc::new(ScriptedBackend::new().reply(GOOD)), "demo");
        let plan = engine
            .plan("You are a buyer.", &observation(), &[], &ActionSet::new())
            .await
            .unwrap();
        assert_eq!(plan.action.name, "speak_to");
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_raw_reply() {
        let engine = ReasoningEngine::new(
            Arc::new(ScriptedBackend::new().reply("Sure! I will buy.")),
            "demo",
        );
        let failure = engine
            .plan("You are a buyer.", &observation(), &[], &ActionSet::new())
            .await
            .unwrap_err();

        assert_eq!(failure.kind(), ErrorKind::ParseFailure);
        assert_eq!(failure.raw.as_deref(), Some("Sure! I will buy."));
        let noop = failure.into_noop();
        assert!(noop.is_noop());
        assert_eq!(noop.reasoning, "Sure! I will buy.");
    }

    #[tokio::test]
    async fn test_retry_is_invisible_to_the_engine() {
        let backend = Retrying::new(
            ScriptedBackend::new()
                .fail(ErrorKind::BackendTimeout)
                .fail(ErrorKind::BackendTimeout)
                .reply(GOOD),
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_initial_delay(Duration::from_millis(1))
                .without_jitter(),
        );
        let engine = ReasoningEngine::new(Arc::new(backend), "demo");

        let plan = engine
            .plan("You are a buyer.", &observation(), &[], &ActionSet::new())
            .await
            .unwrap();
        assert_eq!(plan.reasoning, "The buyer can afford it.");
    }

    #[tokio::test]
    async fn test_backend_failure_has_no_raw() {
        let engine = ReasoningEngine::new(
            Arc::new(ScriptedBackend::new().fail(ErrorKind::BackendUnavailable)),
            "demo",
        );
        let failure = engine
            .plan("r", &observation(), &[], &ActionSet::new())
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::BackendUnavailable);
        assert!(failure.raw.is_none());
        assert_eq!(failure.error.operation(), "reasoning::plan");
    }
}
