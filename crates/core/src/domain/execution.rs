use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::intent::{Confidence, Intent, IntentType, RawIntent};
use crate::domain::plan::Plan;
use crate::errors::FaultKind;
use crate::normalizer::NormalizationResult;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Overall run status. REFLECTING only occurs when a replanner is wired in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Executing,
    Reflecting,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::Reflecting => "REFLECTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "EXECUTING" => Some(Self::Executing),
            "REFLECTING" => Some(Self::Reflecting),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Per-step execution record. `input` holds the parameters as resolved at
/// dispatch time so a replay can see exactly what the tool was given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepExecutionState {
    pub step_id: String,
    pub status: StepStatus,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
}

impl StepExecutionState {
    pub fn pending(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            attempts: 0,
            started_at: None,
            completed_at: None,
            latency_ms: None,
        }
    }
}

/// Structured run-level error: which step failed and why.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunError {
    pub failed_step: Option<String>,
    pub kind: FaultKind,
    pub message: String,
}

/// Persisted state of one logical run, owned by the engine for the run's
/// lifetime and saved after every transition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution_id: ExecutionId,
    pub status: RunStatus,
    pub plan: Plan,
    pub step_states: BTreeMap<String, StepExecutionState>,
    pub error: Option<RunError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionState {
    pub fn new(execution_id: ExecutionId, plan: Plan, now: DateTime<Utc>) -> Self {
        let step_states = plan
            .steps
            .iter()
            .map(|step| (step.id.clone(), StepExecutionState::pending(&step.id)))
            .collect();
        Self {
            execution_id,
            status: RunStatus::Pending,
            plan,
            step_states,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Outputs of every completed step, preserved even when the run fails.
    pub fn completed_outputs(&self) -> BTreeMap<String, Value> {
        self.step_states
            .values()
            .filter(|state| state.status == StepStatus::Completed)
            .filter_map(|state| {
                state.output.clone().map(|output| (state.step_id.clone(), output))
            })
            .collect()
    }
}

/// Minimal snapshot sufficient to deterministically regenerate every derived
/// value of the intent pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub raw_text: String,
    pub intent_type: IntentType,
    pub intent: Intent,
    pub normalization_result: NormalizationResult,
    pub confidence_result: Confidence,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl PipelineState {
    /// The snapshot intent in the loose form the normalizer accepts.
    pub fn raw_intent(&self) -> RawIntent {
        RawIntent::from(self.intent.clone())
    }
}
