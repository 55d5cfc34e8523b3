//! Scripted provider - replays canned outcomes in-process
//!
//! No network involved. Each `send` pops the next step of the script; once
//! the script runs dry the optional responder closure answers instead. Used
//! by tests and by offline runs of the CLI.

use super::*;
use llsim_error::ErrorKind;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Responder = dyn Fn(&BackendRequest) -> String + Send + Sync;

/// One scripted outcome
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Answer with this content
    Reply(String),
    /// Answer with this content after a delay
    ReplyAfter(Duration, String),
    /// Fail with an error of this kind (status follows the kind's default)
    Fail(ErrorKind),
    /// Never answer
    Hang,
}

/// In-process backend driven by a script
pub struct ScriptedBackend {
    model: String,
    script: Mutex<VecDeque<ScriptStep>>,
    responder: Option<Box<Responder>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            model: "scripted".into(),
            script: Mutex::new(VecDeque::new()),
            responder: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Queue a step
    pub fn then(self, step: ScriptStep) -> Self {
        self.push(step);
        self
    }

    pub fn reply(self, content: impl Into<String>) -> Self {
        self.then(ScriptStep::Reply(content.into()))
    }

    pub fn fail(self, kind: ErrorKind) -> Self {
        self.then(ScriptStep::Fail(kind))
    }

    /// Answer every request not covered by the script
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&BackendRequest) -> String + Send + Sync + 'static,
    {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Queue a step on a shared instance
    pub fn push(&self, step: ScriptStep) {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(step);
    }

    /// Number of `send` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<ScriptStep> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    fn respond(&self, content: String) -> BackendResponse {
        BackendResponse {
            model: self.model.clone(),
            usage: Usage {
                prompt_tokens: 0,
                completion_tokens: content.len() / 4 + 1,
                total_tokens: content.len() / 4 + 1,
            },
            content,
        }
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn send(&self, request: &BackendRequest) -> Result<BackendResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        match self.next_step() {
            Some(ScriptStep::Reply(content)) => Ok(self.respond(content)),
            Some(ScriptStep::ReplyAfter(delay, content)) => {
                tokio::time::sleep(delay).await;
                Ok(self.respond(content))
            }
            Some(ScriptStep::Fail(kind)) => Err(Error::new(kind, "scripted failure")
                .with_operation("scripted::send")
                .with_context("call", call.to_string())),
            Some(ScriptStep::Hang) => std::future::pending().await,
            None => match &self.responder {
                Some(responder) => Ok(self.respond(responder(request))),
                None => Err(Error::backend_unavailable("script exhausted")
                    .permanent()
                    .with_operation("scripted::send")
                    .with_context("call", call.to_string())),
            },
        }
    }
}
