//! The model - owns the agents and advances time
//!
//! ## Tick lifecycle
//! ```text
//! Idle -> StepInProgress -> StepComplete -> StepInProgress -> ... -> Finished
//! ```
//!
//! Each tick:
//! 1. shuffle the registry with the seeded generator (activation order)
//! 2. every agent observes and deliberates; in parallel mode all
//!    deliberations run concurrently, bounded by the tick deadline
//! 3. plans are applied one by one in activation order
//! 4. queued messages are delivered, in queue order
//! 5. memory consolidation runs where due
//! 6. the step counter advances and records go to the telemetry sinks
//!
//! One agent's failure never stops the tick; it becomes a failed record.

use crate::agent::{Agent, Deliberation};
use crate::environment::Environment;
use crate::state::AgentId;
use crate::telemetry::{StepRecord, TelemetrySink, TracingSink};
use futures_util::future::join_all;
use llsim_error::{Error, ErrorKind, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Scheduler settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Seed for the activation-order generator
    pub seed: u64,
    /// Finish after this many ticks
    pub max_steps: Option<u64>,
    /// Deliberate concurrently, then apply in activation order
    pub parallel: bool,
    /// Wall-clock bound on the deliberation phase of one tick
    #[serde(with = "opt_millis", rename = "tick_timeout_ms")]
    pub tick_timeout: Option<Duration>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_steps: None,
            parallel: true,
            tick_timeout: None,
        }
    }
}

impl ModelConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = Some(timeout);
        self
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    Idle,
    StepInProgress,
    StepComplete,
    Finished,
}

/// Stops a run before its next tick. The in-flight tick always completes.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened in one tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub step: u64,
    /// Activation order
    pub order: Vec<AgentId>,
    /// One record per agent, in activation order
    pub records: Vec<StepRecord>,
    pub elapsed: Duration,
}

impl TickReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter().filter(|r| !r.is_success())
    }

    pub fn failure_counts(&self) -> BTreeMap<ErrorKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.records.iter().filter_map(StepRecord::failure_kind) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    /// Failed records over all records (0 for an empty tick)
    pub fn failure_ratio(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        self.failures().count() as f64 / self.records.len() as f64
    }
}

pub struct Model {
    config: ModelConfig,
    agents: Vec<Box<dyn Agent>>,
    env: Environment,
    rng: StdRng,
    steps: u64,
    state: ModelState,
    stop: StopHandle,
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl Model {
    /// A model with a [`TracingSink`] attached
    pub fn new(config: ModelConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            agents: Vec::new(),
            env: Environment::new(),
            rng,
            steps: 0,
            state: ModelState::Idle,
            stop: StopHandle::default(),
            sinks: vec![Box::new(TracingSink)],
        }
    }

    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.add_sink(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }

    /// Register an agent. The builder receives the id the model assigned.
    ///
    /// Names must be unique: a taken name fails with `ConfigInvalid`.
    pub fn add_agent<A, F>(&mut self, build: F) -> Result<AgentId>
    where
        A: Agent + 'static,
        F: FnOnce(AgentId) -> A,
    {
        self.try_add_agent(|id| Ok(build(id)))
    }

    /// Like [`Model::add_agent`] for builders that can fail
    pub fn try_add_agent<A, F>(&mut self, build: F) -> Result<AgentId>
    where
        A: Agent + 'static,
        F: FnOnce(AgentId) -> Result<A>,
    {
        let id = AgentId(self.agents.len() as u64);
        let agent = build(id)?;
        if self.env.resolve(agent.name()).is_some() {
            return Err(Error::config_invalid(format!("agent name '{}' is taken", agent.name()))
                .with_operation("model::add_agent"));
        }
        self.env.register(id, agent.name());
        self.agents.push(Box::new(agent));
        Ok(id)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Agents in registration order
    pub fn agents(&self) -> impl Iterator<Item = &dyn Agent> {
        self.agents.iter().map(|a| a.as_ref())
    }

    pub fn agent(&self, id: AgentId) -> Option<&dyn Agent> {
        self.agents.get(id.index()).map(|a| a.as_ref())
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Completed ticks
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn finished_error(&self) -> Error {
        Error::new(ErrorKind::SimulationFinished, "the model has finished")
            .with_operation("model::step")
            .with_context("steps", self.steps.to_string())
    }

    /// Run one tick.
    ///
    /// Fails only with `SimulationFinished`; agent failures are part of the
    /// report.
    pub async fn step(&mut self) -> Result<TickReport> {
        if self.state != ModelState::Finished && self.stop.is_stopped() {
            info!(steps = self.steps, "stop requested");
            self.state = ModelState::Finished;
        }
        if self.state == ModelState::Finished {
            return Err(self.finished_error());
        }

        let started = Instant::now();
        let step = self.steps + 1;
        self.state = ModelState::StepInProgress;
        self.env.begin_step(step);

        let mut order: Vec<usize> = (0..self.agents.len()).collect();
        order.shuffle(&mut self.rng);
        let deadline = self.config.tick_timeout.map(|t| started + t);
        debug!(step, order = ?order, "tick started");

        let records = if self.config.parallel {
            self.step_parallel(step, &order, deadline).await
        } else {
            self.step_sequential(step, &order, deadline).await
        };

        self.deliver_messages();
        self.consolidate(step);

        self.steps = step;
        self.state = match self.config.max_steps {
            Some(max) if step >= max => ModelState::Finished,
            _ => ModelState::StepComplete,
        };

        for sink in &mut self.sinks {
            let written = records
                .iter()
                .try_for_each(|record| sink.record(record))
                .and_then(|()| sink.flush());
            if let Err(err) = written {
                warn!(step, kind = err.kind().as_str(), error = %err, "telemetry sink failed");
            }
        }

        let report = TickReport {
            step,
            order: order.iter().map(|&i| self.agents[i].id()).collect(),
            records,
            elapsed: started.elapsed(),
        };
        let failed = report.failures().count();
        if failed > 0 {
            warn!(step, failed, agents = report.records.len(), "tick finished with failures");
        } else {
            info!(step, agents = report.records.len(), "tick finished");
        }
        Ok(report)
    }

    /// Run up to `ticks` ticks, stopping early on the stop signal or the
    /// step budget.
    pub async fn run(&mut self, ticks: u64) -> Result<Vec<TickReport>> {
        if self.state == ModelState::Finished {
            return Err(self.finished_error());
        }

        let mut reports = Vec::new();
        for _ in 0..ticks {
            if self.stop.is_stopped() {
                info!(steps = self.steps, "stop requested");
                self.state = ModelState::Finished;
                break;
            }
            reports.push(self.step().await?);
            if self.state == ModelState::Finished {
                break;
            }
        }
        Ok(reports)
    }

    async fn step_parallel(
        &mut self,
        step: u64,
        order: &[usize],
        deadline: Option<Instant>,
    ) -> Vec<StepRecord> {
        let timeout = self.config.tick_timeout;
        let observations: Vec<_> = order
            .iter()
            .map(|&i| self.agents[i].observe(&self.env, step))
            .collect();

        let deliberations = join_all(order.iter().zip(&observations).map(|(&i, observation)| {
            let agent = self.agents[i].as_ref();
            bounded(agent.deliberate(observation), step, agent.id(), deadline, timeout)
        }))
        .await;

        order
            .iter()
            .zip(deliberations)
            .map(|(&i, deliberation)| self.agents[i].act(deliberation, &mut self.env))
            .collect()
    }

    async fn step_sequential(
        &mut self,
        step: u64,
        order: &[usize],
        deadline: Option<Instant>,
    ) -> Vec<StepRecord> {
        let timeout = self.config.tick_timeout;
        let mut records = Vec::with_capacity(order.len());
        for &i in order {
            let agent = &mut self.agents[i];
            let observation = agent.observe(&self.env, step);
            let deliberation = bounded(
                agent.deliberate(&observation),
                step,
                agent.id(),
                deadline,
                timeout,
            )
            .await;
            records.push(agent.act(deliberation, &mut self.env));
        }
        records
    }

    fn deliver_messages(&mut self) {
        for message in self.env.take_outbox() {
            match self.agents.get_mut(message.to.index()) {
                Some(agent) => agent.receive(&message),
                None => warn!(to = %message.to, "message for unknown agent dropped"),
            }
        }
    }

    fn consolidate(&mut self, step: u64) {
        self.state = ModelState::StepComplete;
        for agent in &mut self.agents {
            if agent.memory().consolidation_due(step) {
                let promoted = agent.memory_mut().consolidate();
                debug!(agent = %agent.id(), step, promoted, "memory consolidated");
            }
        }
    }
}

/// Apply the tick deadline to one deliberation
async fn bounded<F>(
    deliberation: F,
    step: u64,
    agent: AgentId,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
) -> Deliberation
where
    F: Future<Output = Deliberation>,
{
    match deadline {
        Some(deadline) => match timeout_at(deadline, deliberation).await {
            Ok(deliberation) => deliberation,
            Err(_) => {
                warn!(agent = %agent, step, "deliberation hit the tick deadline");
                Deliberation::timed_out(step, agent, timeout.unwrap_or_default())
            }
        },
        None => deliberation.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionContext, ActionHandler, ActionSet, Post, SetState, SpeakTo};
    use crate::agent::LlmAgent;
    use crate::reasoning::ReasoningEngine;
    use crate::state::InternalState;
    use llsim_llm::{Backend, ScriptStep, ScriptedBackend};
    use serde_json::{json, Map, Value};
    use std::sync::Mutex;

    fn plan(action: &str, args: Value) -> String {
        format!(
            "<reasoning>step plan</reasoning><action>{}</action>",
            json!({ "name": action, "args": args })
        )
    }

    fn llm_agent(
        id: AgentId,
        name: &str,
        backend: impl Backend + 'static,
        actions: ActionSet,
        state: InternalState,
    ) -> LlmAgent {
        LlmAgent::new(id, name, format!("You are {}.", name), ReasoningEngine::new(Arc::new(backend), "demo"), actions)
            .with_state(state)
    }

    fn noop_backend() -> ScriptedBackend {
        ScriptedBackend::new().with_responder(|_| plan("noop", json!({})))
    }

    /// Appends the agent's name to the `log` list on the board
    struct AppendLog;

    impl ActionHandler for AppendLog {
        fn name(&self) -> &str {
            "append_log"
        }

        fn description(&self) -> &str {
            "append your name to the log"
        }

        fn apply(&self, ctx: &mut ActionContext<'_>, _args: &Map<String, Value>) -> Result<String> {
            let mut log = ctx.env.board_get("log").cloned().unwrap_or_else(|| json!([]));
            if let Value::Array(items) = &mut log {
                items.push(json!(ctx.agent_name));
            }
            ctx.env.post("log", log);
            Ok("logged".into())
        }
    }

    fn market(config: ModelConfig) -> Model {
        let mut model = Model::new(config);
        let actions = || ActionSet::new().with(SetState).with(SpeakTo).with(Post);

        model.add_agent(|id| {
            let backend = ScriptedBackend::new().with_responder(|_| {
                plan("speak_to", json!({ "to": "all", "message": "apples at 80" }))
            });
            llm_agent(id, "seller", backend, actions(), InternalState::new().with("min_price", 60))
        }).unwrap();
        model.add_agent(|id| {
            let backend = ScriptedBackend::new()
                .reply(plan("set_state", json!({ "interested": true })))
                .reply("I will just think about it")
                .with_responder(|_| plan("noop", json!({})));
            llm_agent(id, "buyer-1", backend, actions(), InternalState::new().with("budget", 100))
        }).unwrap();
        model.add_agent(|id| {
            let backend = ScriptedBackend::new()
                .reply(plan("haggle", json!({ "price": 50 })))
                .with_responder(|_| plan("post", json!({ "key": "bid", "value": 65 })));
            llm_agent(id, "buyer-2", backend, actions(), InternalState::new().with("budget", 70))
        }).unwrap();
        model
    }

    #[tokio::test]
    async fn test_seller_and_two_buyers_for_three_ticks() {
        let mut model = market(ModelConfig::default().with_seed(7));
        let reports = model.run(3).await.unwrap();

        assert_eq!(model.steps(), 3);
        assert_eq!(reports.len(), 3);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.step, i as u64 + 1);
            assert_eq!(report.records.len(), 3);
            let mut ids: Vec<AgentId> = report.records.iter().map(|r| r.agent_id).collect();
            ids.sort();
            assert_eq!(ids, vec![AgentId(0), AgentId(1), AgentId(2)]);
        }

        let counts = reports[0].failure_counts();
        assert_eq!(counts.get(&ErrorKind::UnknownAction), Some(&1));
        assert_eq!(reports[1].failure_counts().get(&ErrorKind::ParseFailure), Some(&1));

        for agent in model.agents() {
            assert!(agent.memory().len() >= 3, "{} remembers too little", agent.name());
        }

        let buyer1 = model.agent(AgentId(1)).unwrap();
        assert_eq!(buyer1.state().get("interested"), Some(&json!(true)));
        assert_eq!(buyer1.state().get_f64("budget"), Some(100.0));
        assert_eq!(model.environment().board_get("bid"), Some(&json!(65)));

        // the seller's offer reached both buyers every tick
        let heard = buyer1
            .memory()
            .short_term()
            .filter(|e| e.content == "seller said: apples at 80")
            .count();
        assert_eq!(heard, 3);
    }

    #[tokio::test]
    async fn test_step_counter_advances_despite_failures() {
        let mut model = Model::new(ModelConfig::default());
        for _ in 0..2 {
            model.add_agent(|id| {
                llm_agent(
                    id,
                    &format!("broken-{}", id.0),
                    ScriptedBackend::new().with_responder(|_| "no tags here".to_string()),
                    ActionSet::new(),
                    InternalState::new(),
                )
            }).unwrap();
        }

        for n in 0..4 {
            assert_eq!(model.steps(), n);
            let report = model.step().await.unwrap();
            assert_eq!(report.failure_ratio(), 1.0);
        }
        assert_eq!(model.steps(), 4);
        assert_eq!(model.state(), ModelState::StepComplete);
    }

    async fn activation_orders(seed: u64) -> Vec<Vec<AgentId>> {
        let mut model = Model::new(ModelConfig::default().with_seed(seed));
        for n in 0..5 {
            model.add_agent(|id| {
                llm_agent(id, &format!("a{}", n), noop_backend(), ActionSet::new(), InternalState::new())
            }).unwrap();
        }
        model
            .run(6)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.order)
            .collect()
    }

    #[tokio::test]
    async fn test_activation_order_is_reproducible() {
        let first = activation_orders(42).await;
        let second = activation_orders(42).await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);

        let mut sorted = first[0].clone();
        sorted.sort();
        assert_eq!(sorted, (0..5).map(AgentId).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_shared_writes_follow_activation_order() {
        let mut model = Model::new(ModelConfig::default().with_seed(3));
        for n in 0..4u64 {
            model.add_agent(|id| {
                // later-registered agents answer first
                let delay = Duration::from_millis(5 + (3 - n) * 15);
                let backend = ScriptedBackend::new()
                    .then(ScriptStep::ReplyAfter(delay, plan("append_log", json!({}))));
                llm_agent(id, &format!("a{}", n), backend, ActionSet::new().with(AppendLog), InternalState::new())
            }).unwrap();
        }

        let report = model.step().await.unwrap();
        let expected: Vec<Value> = report
            .order
            .iter()
            .map(|id| json!(model.environment().name_of(*id).unwrap()))
            .collect();
        assert_eq!(model.environment().board_get("log"), Some(&Value::Array(expected)));
    }

    #[tokio::test]
    async fn test_tick_timeout_fails_only_the_slow_agent() {
        let mut model = Model::new(
            ModelConfig::default().with_tick_timeout(Duration::from_millis(100)),
        );
        let slow = model.add_agent(|id| {
            llm_agent(id, "slow", ScriptedBackend::new().then(ScriptStep::Hang), ActionSet::new(), InternalState::new())
        }).unwrap();
        model.add_agent(|id| llm_agent(id, "fast-1", noop_backend(), ActionSet::new(), InternalState::new())).unwrap();
        model.add_agent(|id| llm_agent(id, "fast-2", noop_backend(), ActionSet::new(), InternalState::new())).unwrap();

        let report = model.step().await.unwrap();

        assert_eq!(model.steps(), 1);
        assert_eq!(report.failures().count(), 1);
        let failed = report.failures().next().unwrap();
        assert_eq!(failed.agent_id, slow);
        assert_eq!(failed.failure_kind(), Some(ErrorKind::BackendTimeout));

        let memory = model.agent(slow).unwrap().memory();
        assert_eq!(memory.len(), 1);
        assert!(memory.short_term().next().unwrap().content.contains("tick deadline"));
    }

    /// Trips the stop handle on the first record
    struct StopAfterFirst(StopHandle);

    impl TelemetrySink for StopAfterFirst {
        fn record(&mut self, _record: &StepRecord) -> Result<()> {
            self.0.stop();
            Ok(())
        }
    }

    struct DiskFull;

    impl TelemetrySink for DiskFull {
        fn record(&mut self, _record: &StepRecord) -> Result<()> {
            Err(Error::new(ErrorKind::IoFailed, "no space left on device"))
        }
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_fail_the_tick() {
        let mut model = Model::new(ModelConfig::default()).with_sink(DiskFull);
        model
            .add_agent(|id| llm_agent(id, "a", noop_backend(), ActionSet::new(), InternalState::new()))
            .unwrap();

        let reports = model.run(2).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(model.steps(), 2);
        assert!(reports.iter().all(|r| r.failures().count() == 0));
    }

    #[tokio::test]
    async fn test_stop_signal_prevents_next_tick() {
        let mut model = Model::new(ModelConfig::default());
        model.add_agent(|id| llm_agent(id, "a", noop_backend(), ActionSet::new(), InternalState::new())).unwrap();
        let stop = model.stop_handle();
        model.add_sink(Box::new(StopAfterFirst(stop)));

        let reports = model.run(5).await.unwrap();

        assert_eq!(reports.len(), 1);
        assert_eq!(model.steps(), 1);
        assert_eq!(model.state(), ModelState::Finished);
        assert_eq!(model.step().await.unwrap_err().kind(), ErrorKind::SimulationFinished);
    }

    #[tokio::test]
    async fn test_max_steps_finishes_run() {
        let mut model = Model::new(ModelConfig::default().with_max_steps(2));
        model.add_agent(|id| llm_agent(id, "a", noop_backend(), ActionSet::new(), InternalState::new())).unwrap();

        let reports = model.run(10).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(model.state(), ModelState::Finished);
        assert_eq!(model.run(1).await.unwrap_err().kind(), ErrorKind::SimulationFinished);
    }

    #[tokio::test]
    async fn test_sequential_mode_sees_earlier_effects() {
        let mut model = Model::new(ModelConfig::default().sequential());
        let seen = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let seen = seen.clone();
            model.add_agent(move |id| {
                let backend = ScriptedBackend::new().with_responder(move |req| {
                    let user = req.content_of(llsim_llm::Role::User);
                    seen.lock().unwrap().push(user.contains("log: ["));
                    plan("append_log", json!({}))
                });
                llm_agent(id, &format!("s{}", n), backend, ActionSet::new().with(AppendLog), InternalState::new())
            }).unwrap();
        }

        model.step().await.unwrap();

        // only the first agent found an empty board
        assert_eq!(*seen.lock().unwrap(), vec![false, true, true]);
    }

    #[tokio::test]
    async fn test_consolidation_runs_when_due() {
        let mut model = Model::new(ModelConfig::default());
        model.add_agent(|id| {
            let memory = crate::memory::Memory::from_config(&crate::memory::MemoryConfig {
                short_term_capacity: 2,
                consolidate_every: Some(2),
                ..Default::default()
            })
            .with_consolidator(crate::memory::KeepRecent { keep: 1 });
            llm_agent(id, "a", noop_backend(), ActionSet::new(), InternalState::new()).with_memory(memory)
        }).unwrap();

        model.run(4).await.unwrap();

        let memory = model.agent(AgentId(0)).unwrap().memory();
        assert_eq!(memory.long_term_len(), 2);
        assert_eq!(memory.long_term().map(|e| e.step).collect::<Vec<_>>(), vec![2, 4]);
    }

    #[test]
    fn test_config_from_json() {
        let config: ModelConfig = serde_json::from_value(json!({
            "seed": 9,
            "parallel": false,
            "tick_timeout_ms": 1500
        }))
        .unwrap();
        assert_eq!(config.seed, 9);
        assert!(!config.parallel);
        assert_eq!(config.tick_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_steps, None);
    }

    #[tokio::test]
    async fn test_run_zero_ticks_leaves_model_idle() {
        let mut model = market(ModelConfig::default());

        let reports = model.run(0).await.unwrap();

        assert!(reports.is_empty());
        assert_eq!(model.steps(), 0);
        assert_eq!(model.state(), ModelState::Idle);
        for agent in model.agents() {
            assert!(agent.memory().is_empty());
        }
    }

    #[test]
    fn test_duplicate_agent_name_rejected() {
        let mut model = Model::new(ModelConfig::default());
        model
            .add_agent(|id| llm_agent(id, "twin", noop_backend(), ActionSet::new(), InternalState::new()))
            .unwrap();

        let err = model
            .add_agent(|id| llm_agent(id, "twin", noop_backend(), ActionSet::new(), InternalState::new()))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(model.agents().count(), 1);
        assert_eq!(model.environment().resolve("twin"), Some(AgentId(0)));
    }
}
