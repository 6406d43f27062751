//! Serial plan execution with persist-after-every-transition semantics.
//!
//! The engine owns no internal pool: each run is driven on the caller's task,
//! dispatching the single most-ready step at a time. Every run-level and
//! step-level transition is saved before the next dispatch, so a crashed run
//! resumes from its last persisted state without re-executing completed
//! steps.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use waypoint_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use waypoint_core::config::ExecutionConfig;
use waypoint_core::domain::execution::{
    ExecutionId, ExecutionState, RunError, RunStatus, StepExecutionState, StepStatus,
};
use waypoint_core::domain::plan::{Plan, PlanStep, RawPlan};
use waypoint_core::errors::{ApplicationError, DomainError, FaultKind};
use waypoint_core::steps::{
    outstanding_steps, ready_steps, resolve_parameters, validate_run_transition,
    validate_step_transition,
};
use waypoint_store::{AuditLog, StateStore};

use crate::reliability::ReliabilityLayer;
use crate::tools::{validate_input, ToolRegistry};

const ENGINE_ACTOR: &str = "execution-engine";

pub enum ReflectionOutcome {
    Accept,
    Reject { reason: String },
}

/// Optional post-execution review hook. Runs in the REFLECTING phase after
/// every step has completed and may veto the run as a whole.
#[async_trait]
pub trait Replanner: Send + Sync {
    async fn reflect(&self, state: &ExecutionState) -> ReflectionOutcome;
}

pub struct ExecutionEngine {
    store: Arc<dyn StateStore>,
    audit: Arc<dyn AuditLog>,
    tools: ToolRegistry,
    reliability: ReliabilityLayer,
    config: ExecutionConfig,
    replanner: Option<Arc<dyn Replanner>>,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        audit: Arc<dyn AuditLog>,
        tools: ToolRegistry,
        reliability: ReliabilityLayer,
        config: ExecutionConfig,
    ) -> Self {
        Self { store, audit, tools, reliability, config, replanner: None }
    }

    pub fn with_replanner(mut self, replanner: Arc<dyn Replanner>) -> Self {
        self.replanner = Some(replanner);
        self
    }

    /// Validates an untrusted plan and runs it to a terminal state.
    pub async fn start(&self, raw: RawPlan) -> Result<ExecutionState, ApplicationError> {
        let plan = Plan::from_raw(raw, self.config.default_timeout_ms).map_err(DomainError::from)?;
        self.start_plan(plan).await
    }

    pub async fn start_plan(&self, plan: Plan) -> Result<ExecutionState, ApplicationError> {
        let mut state = ExecutionState::new(ExecutionId::generate(), plan, Utc::now());
        self.persist(&mut state).await?;
        self.emit(
            AuditEvent::new(
                Some(state.execution_id.clone()),
                None,
                "run.created",
                AuditCategory::Execution,
                ENGINE_ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("steps", state.plan.steps.len().to_string()),
        )
        .await;
        self.run(state).await
    }

    /// Resuming a terminal run is a no-op returning the stored result.
    pub async fn resume(&self, id: &ExecutionId) -> Result<ExecutionState, ApplicationError> {
        let state = self.load(id).await?;
        if state.status.is_terminal() {
            return Ok(state);
        }
        self.run(state).await
    }

    /// Cancels a non-terminal run. Terminal runs are returned unchanged.
    pub async fn cancel(&self, id: &ExecutionId) -> Result<ExecutionState, ApplicationError> {
        let mut state = self.load(id).await?;
        if state.status.is_terminal() {
            return Ok(state);
        }
        self.transition_run(&mut state, RunStatus::Cancelled).await?;
        self.emit(AuditEvent::new(
            Some(state.execution_id.clone()),
            None,
            "run.cancelled",
            AuditCategory::Execution,
            ENGINE_ACTOR,
            AuditOutcome::Rejected,
        ))
        .await;
        Ok(state)
    }

    async fn load(&self, id: &ExecutionId) -> Result<ExecutionState, ApplicationError> {
        self.store
            .load(id)
            .await
            .map_err(|err| ApplicationError::Persistence(err.to_string()))?
            .ok_or_else(|| ApplicationError::Persistence(format!("unknown execution {id}")))
    }

    async fn run(&self, mut state: ExecutionState) -> Result<ExecutionState, ApplicationError> {
        self.recover_in_flight(&mut state).await?;
        self.transition_run(&mut state, RunStatus::Executing).await?;

        loop {
            let next = ready_steps(&state.plan, &state.step_states).first().map(|s| (*s).clone());
            let Some(step) = next else {
                if outstanding_steps(&state.plan, &state.step_states).is_empty() {
                    break;
                }
                return self.fail_run(
                    state,
                    RunError {
                        failed_step: None,
                        kind: FaultKind::Deadlock,
                        message: "circular dependency: no step is ready but steps remain"
                            .to_owned(),
                    },
                )
                .await;
            };

            if let Some(error) = self.dispatch_step(&mut state, &step).await? {
                return self.fail_run(state, error).await;
            }
        }

        if self.config.reflection_enabled {
            if let Some(replanner) = self.replanner.clone() {
                self.transition_run(&mut state, RunStatus::Reflecting).await?;
                if let ReflectionOutcome::Reject { reason } = replanner.reflect(&state).await {
                    return self.fail_run(
                        state,
                        RunError {
                            failed_step: None,
                            kind: FaultKind::Validation,
                            message: reason,
                        },
                    )
                    .await;
                }
            }
        }

        self.transition_run(&mut state, RunStatus::Completed).await?;
        self.emit(AuditEvent::new(
            Some(state.execution_id.clone()),
            None,
            "run.completed",
            AuditCategory::Execution,
            ENGINE_ACTOR,
            AuditOutcome::Success,
        ))
        .await;
        Ok(state)
    }

    /// Dispatches one step. Returns the run-level error on step failure;
    /// the run itself is failed by the caller (abort-on-first-failure).
    async fn dispatch_step(
        &self,
        state: &mut ExecutionState,
        step: &PlanStep,
    ) -> Result<Option<RunError>, ApplicationError> {
        let resolved = resolve_parameters(step, &state.completed_outputs());

        {
            let step_state = step_state_mut(state, &step.id)?;
            validate_step_transition(step_state.status, StepStatus::InProgress)?;
            step_state.status = StepStatus::InProgress;
            step_state.input = Some(resolved.clone());
            step_state.started_at = Some(Utc::now());
        }
        self.persist(state).await?;
        self.emit(
            AuditEvent::new(
                Some(state.execution_id.clone()),
                Some(step.id.clone()),
                "step.dispatched",
                AuditCategory::Execution,
                ENGINE_ACTOR,
                AuditOutcome::Success,
            )
            .with_metadata("tool", step.tool_name.clone()),
        )
        .await;

        let Some(tool) = self.tools.get(&step.tool_name) else {
            return Ok(Some(
                self.fail_step(
                    state,
                    &step.id,
                    FaultKind::Validation,
                    format!("unknown tool {}", step.tool_name),
                    0,
                )
                .await?,
            ));
        };

        if let Err(failure) = validate_input(tool.as_ref(), &resolved) {
            return Ok(Some(
                self.fail_step(state, &step.id, FaultKind::Validation, failure.message, 0)
                    .await?,
            ));
        }

        let caller = state.execution_id.0.clone();
        match self
            .reliability
            .call(&caller, &step.tool_name, tool.as_ref(), resolved, step.timeout_ms)
            .await
        {
            Ok(outcome) => {
                info!(
                    execution_id = %state.execution_id,
                    step_id = %step.id,
                    latency_ms = outcome.latency_ms,
                    attempts = outcome.attempts,
                    "step completed"
                );
                {
                    let step_state = step_state_mut(state, &step.id)?;
                    validate_step_transition(step_state.status, StepStatus::Completed)?;
                    step_state.status = StepStatus::Completed;
                    step_state.output = Some(outcome.output);
                    step_state.attempts = outcome.attempts;
                    step_state.latency_ms = Some(outcome.latency_ms);
                    step_state.completed_at = Some(Utc::now());
                }
                self.persist(state).await?;
                self.emit(
                    AuditEvent::new(
                        Some(state.execution_id.clone()),
                        Some(step.id.clone()),
                        "step.completed",
                        AuditCategory::Execution,
                        ENGINE_ACTOR,
                        AuditOutcome::Success,
                    )
                    .with_metadata("attempts", outcome.attempts.to_string()),
                )
                .await;
                Ok(None)
            }
            Err(failure) => {
                let kind = match failure.kind {
                    FaultKind::Validation => FaultKind::Validation,
                    FaultKind::ResourceUnavailable => FaultKind::ResourceUnavailable,
                    _ => FaultKind::StepFailure,
                };
                Ok(Some(
                    self.fail_step(state, &step.id, kind, failure.message, failure.attempts)
                        .await?,
                ))
            }
        }
    }

    async fn fail_step(
        &self,
        state: &mut ExecutionState,
        step_id: &str,
        kind: FaultKind,
        message: String,
        attempts: u32,
    ) -> Result<RunError, ApplicationError> {
        {
            let step_state = step_state_mut(state, step_id)?;
            validate_step_transition(step_state.status, StepStatus::Failed)?;
            step_state.status = StepStatus::Failed;
            step_state.error = Some(message.clone());
            step_state.attempts = step_state.attempts.max(attempts);
            step_state.completed_at = Some(Utc::now());
        }
        self.persist(state).await?;
        self.emit(
            AuditEvent::new(
                Some(state.execution_id.clone()),
                Some(step_id.to_owned()),
                "step.failed",
                AuditCategory::Execution,
                ENGINE_ACTOR,
                AuditOutcome::Failed,
            )
            .with_metadata("kind", kind.as_str()),
        )
        .await;

        Ok(RunError { failed_step: Some(step_id.to_owned()), kind, message })
    }

    /// Terminal failure path: the error and all previously completed step
    /// outputs stay on the persisted state.
    async fn fail_run(
        &self,
        mut state: ExecutionState,
        error: RunError,
    ) -> Result<ExecutionState, ApplicationError> {
        state.error = Some(error.clone());
        self.transition_run(&mut state, RunStatus::Failed).await?;
        self.emit(
            AuditEvent::new(
                Some(state.execution_id.clone()),
                error.failed_step.clone(),
                "run.failed",
                AuditCategory::Execution,
                ENGINE_ACTOR,
                AuditOutcome::Failed,
            )
            .with_metadata("kind", error.kind.as_str()),
        )
        .await;
        Ok(state)
    }

    /// A step persisted as in_progress belongs to a run that died mid-call.
    /// Its attempt never recorded an outcome, so it goes back to pending.
    async fn recover_in_flight(&self, state: &mut ExecutionState) -> Result<(), ApplicationError> {
        let recovered: Vec<String> = state
            .step_states
            .values_mut()
            .filter(|step_state| step_state.status == StepStatus::InProgress)
            .map(|step_state| {
                step_state.status = StepStatus::Pending;
                step_state.input = None;
                step_state.started_at = None;
                step_state.step_id.clone()
            })
            .collect();

        if recovered.is_empty() {
            return Ok(());
        }

        self.persist(state).await?;
        for step_id in recovered {
            self.emit(AuditEvent::new(
                Some(state.execution_id.clone()),
                Some(step_id),
                "step.recovered",
                AuditCategory::System,
                ENGINE_ACTOR,
                AuditOutcome::Success,
            ))
            .await;
        }
        Ok(())
    }

    async fn transition_run(
        &self,
        state: &mut ExecutionState,
        to: RunStatus,
    ) -> Result<(), ApplicationError> {
        validate_run_transition(state.status, to)?;
        state.status = to;
        if to.is_terminal() {
            state.completed_at = Some(Utc::now());
        }
        self.persist(state).await
    }

    async fn persist(&self, state: &mut ExecutionState) -> Result<(), ApplicationError> {
        state.updated_at = Utc::now();
        self.store
            .save(state)
            .await
            .map_err(|err| ApplicationError::Persistence(err.to_string()))
    }

    async fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(&event).await {
            warn!(event_type = %event.event_type, error = %err, "audit record dropped");
        }
    }
}

fn step_state_mut<'a>(
    state: &'a mut ExecutionState,
    step_id: &str,
) -> Result<&'a mut StepExecutionState, ApplicationError> {
    state
        .step_states
        .get_mut(step_id)
        .ok_or_else(|| {
            DomainError::InvariantViolation(format!("no step state for {step_id}")).into()
        })
}
