//! Per-step records and where they go

use crate::plan::Action;
use crate::state::AgentId;
use llsim_error::{Error, ErrorKind, Result};
use serde::{Serialize, Serializer};
use std::io::Write;
use tracing::{info, warn};

/// How one agent step ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Success {
        result: String,
    },
    Failed {
        #[serde(serialize_with = "kind_name")]
        kind: ErrorKind,
        message: String,
    },
}

fn kind_name<S: Serializer>(kind: &ErrorKind, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(kind.as_str())
}

impl StepOutcome {
    pub fn failed(err: &Error) -> Self {
        StepOutcome::Failed {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }
}

/// One completed agent step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub step: u64,
    pub reasoning: String,
    /// `None` when no plan was produced
    pub action: Option<Action>,
    pub outcome: StepOutcome,
}

impl StepRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            StepOutcome::Failed { kind, .. } => Some(*kind),
            StepOutcome::Success { .. } => None,
        }
    }
}

/// Receives every step record, after each tick, in activation order.
///
/// A failing sink is logged by the model; the tick still completes.
pub trait TelemetrySink: Send {
    fn record(&mut self, record: &StepRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects records in memory
impl TelemetrySink for Vec<StepRecord> {
    fn record(&mut self, record: &StepRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// One `tracing` event per record
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&mut self, record: &StepRecord) -> Result<()> {
        let action = record
            .action
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        match &record.outcome {
            StepOutcome::Success { result } => info!(
                target: "llsim::telemetry",
                agent = %record.agent_id,
                name = %record.agent_name,
                step = record.step,
                action = %action,
                result = %result,
                reasoning = %record.reasoning,
                "step ok"
            ),
            StepOutcome::Failed { kind, message } => warn!(
                target: "llsim::telemetry",
                agent = %record.agent_id,
                name = %record.agent_name,
                step = record.step,
                action = %action,
                kind = kind.as_str(),
                message = %message,
                "step failed"
            ),
        }
        Ok(())
    }
}

/// One JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn record(&mut self, record: &StepRecord) -> Result<()> {
        let line = serde_json::to_string(record).map_err(|err| {
            Error::serialization_failed(err.to_string())
                .with_operation("telemetry::record")
                .with_context("agent", record.agent_id.to_string())
                .with_context("step", record.step.to_string())
                .set_source(err)
        })?;
        writeln!(self.writer, "{}", line)
            .map_err(|err| Error::from(err).with_operation("telemetry::record"))
    }

    fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|err| Error::from(err).with_operation("telemetry::flush"))
    }
}
