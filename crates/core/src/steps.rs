//! Step state machine: transition rules, readiness, and parameter resolution.
//!
//! Everything here is pure. The execution engine calls these functions and
//! owns the side effects (persistence, tool invocation, audit records).

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::domain::execution::{RunStatus, StepExecutionState, StepStatus};
use crate::domain::plan::{Plan, PlanStep, StepParameter};
use crate::errors::DomainError;

/// Legal step transitions. Same-state transitions are allowed so that a
/// resumed run can idempotently re-apply its persisted state.
pub fn validate_step_transition(from: StepStatus, to: StepStatus) -> Result<(), DomainError> {
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (StepStatus::Pending, StepStatus::InProgress) => Ok(()),
        (StepStatus::InProgress, StepStatus::Completed) => Ok(()),
        (StepStatus::InProgress, StepStatus::Failed) => Ok(()),
        (from, to) => Err(DomainError::InvalidStepTransition { from, to }),
    }
}

/// Legal run transitions. REFLECTING is only entered from EXECUTING and the
/// terminal states accept no outgoing transitions.
pub fn validate_run_transition(from: RunStatus, to: RunStatus) -> Result<(), DomainError> {
    match (from, to) {
        (a, b) if a == b => Ok(()),
        (RunStatus::Pending, RunStatus::Executing) => Ok(()),
        (RunStatus::Pending, RunStatus::Cancelled) => Ok(()),
        (RunStatus::Executing, RunStatus::Reflecting) => Ok(()),
        (RunStatus::Executing, RunStatus::Completed) => Ok(()),
        (RunStatus::Executing, RunStatus::Failed) => Ok(()),
        (RunStatus::Executing, RunStatus::Cancelled) => Ok(()),
        (RunStatus::Reflecting, RunStatus::Executing) => Ok(()),
        (RunStatus::Reflecting, RunStatus::Completed) => Ok(()),
        (RunStatus::Reflecting, RunStatus::Failed) => Ok(()),
        (RunStatus::Reflecting, RunStatus::Cancelled) => Ok(()),
        (from, to) => Err(DomainError::InvalidRunTransition { from, to }),
    }
}

/// Steps that may be dispatched now: still pending, with every declared
/// dependency completed. Plan order is preserved, so the first element is the
/// most-ready step under the serial dispatch policy.
pub fn ready_steps<'a>(
    plan: &'a Plan,
    step_states: &BTreeMap<String, StepExecutionState>,
) -> Vec<&'a PlanStep> {
    plan.steps
        .iter()
        .filter(|step| {
            let pending = step_states
                .get(&step.id)
                .map(|state| state.status == StepStatus::Pending)
                .unwrap_or(false);
            pending
                && step.dependencies.iter().all(|dependency| {
                    step_states
                        .get(dependency)
                        .map(|state| state.status == StepStatus::Completed)
                        .unwrap_or(false)
                })
        })
        .collect()
}

/// Steps that have not reached a terminal step status.
pub fn outstanding_steps<'a>(
    plan: &'a Plan,
    step_states: &BTreeMap<String, StepExecutionState>,
) -> Vec<&'a PlanStep> {
    plan.steps
        .iter()
        .filter(|step| {
            step_states
                .get(&step.id)
                .map(|state| {
                    matches!(state.status, StepStatus::Pending | StepStatus::InProgress)
                })
                .unwrap_or(true)
        })
        .collect()
}

/// An empty ready set with steps still outstanding means the plan graph has a
/// cycle. The engine never mutates dependencies, so this can only come from a
/// malformed input plan.
pub fn is_deadlocked(plan: &Plan, step_states: &BTreeMap<String, StepExecutionState>) -> bool {
    ready_steps(plan, step_states).is_empty() && !outstanding_steps(plan, step_states).is_empty()
}

/// Substitutes dependency references with recorded outputs at dispatch time.
/// A reference that cannot be resolved restores its original literal string.
pub fn resolve_parameters(
    step: &PlanStep,
    completed_outputs: &BTreeMap<String, Value>,
) -> Value {
    let mut resolved = Map::new();
    for (name, parameter) in &step.parameters {
        let value = match parameter {
            StepParameter::Literal { value } => value.clone(),
            StepParameter::Reference { step_id, path } => completed_outputs
                .get(step_id)
                .and_then(|output| lookup_path(output, path))
                .unwrap_or_else(|| parameter.to_wire()),
        };
        resolved.insert(name.clone(), value);
    }
    Value::Object(resolved)
}

/// Walks dot-separated object keys and numeric array indexes. An empty path
/// addresses the whole output.
fn lookup_path(output: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(output.clone());
    }
    let mut current = output;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::{RawPlan, RawPlanStep};
    use serde_json::json;

    fn diamond_plan() -> Plan {
        let raw = RawPlan {
            steps: vec![
                RawPlanStep {
                    id: "fetch".to_owned(),
                    tool_name: "http_get".to_owned(),
                    parameters: BTreeMap::new(),
                    dependencies: Vec::new(),
                    timeout_ms: None,
                },
                RawPlanStep {
                    id: "parse".to_owned(),
                    tool_name: "json_parse".to_owned(),
                    parameters: BTreeMap::new(),
                    dependencies: vec!["fetch".to_owned()],
                    timeout_ms: None,
                },
                RawPlanStep {
                    id: "store".to_owned(),
                    tool_name: "db_write".to_owned(),
                    parameters: BTreeMap::new(),
                    dependencies: vec!["fetch".to_owned()],
                    timeout_ms: None,
                },
                RawPlanStep {
                    id: "notify".to_owned(),
                    tool_name: "notify".to_owned(),
                    parameters: BTreeMap::new(),
                    dependencies: vec!["parse".to_owned(), "store".to_owned()],
                    timeout_ms: None,
                },
            ],
        };
        Plan::from_raw(raw, 30_000).expect("valid plan")
    }

    fn fresh_states(plan: &Plan) -> BTreeMap<String, StepExecutionState> {
        plan.steps
            .iter()
            .map(|step| (step.id.clone(), StepExecutionState::pending(&step.id)))
            .collect()
    }

    fn mark(states: &mut BTreeMap<String, StepExecutionState>, id: &str, status: StepStatus) {
        states.get_mut(id).expect("known step").status = status;
    }

    #[test]
    fn step_transitions_follow_the_table() {
        assert!(validate_step_transition(StepStatus::Pending, StepStatus::InProgress).is_ok());
        assert!(validate_step_transition(StepStatus::InProgress, StepStatus::Completed).is_ok());
        assert!(validate_step_transition(StepStatus::InProgress, StepStatus::Failed).is_ok());
        assert!(validate_step_transition(StepStatus::Pending, StepStatus::Pending).is_ok());

        assert!(validate_step_transition(StepStatus::Pending, StepStatus::Completed).is_err());
        assert!(validate_step_transition(StepStatus::Completed, StepStatus::InProgress).is_err());
        assert!(validate_step_transition(StepStatus::Failed, StepStatus::InProgress).is_err());
    }

    #[test]
    fn run_transitions_follow_the_table() {
        assert!(validate_run_transition(RunStatus::Pending, RunStatus::Executing).is_ok());
        assert!(validate_run_transition(RunStatus::Executing, RunStatus::Reflecting).is_ok());
        assert!(validate_run_transition(RunStatus::Reflecting, RunStatus::Executing).is_ok());
        assert!(validate_run_transition(RunStatus::Executing, RunStatus::Failed).is_ok());
        assert!(validate_run_transition(RunStatus::Completed, RunStatus::Completed).is_ok());

        assert!(validate_run_transition(RunStatus::Pending, RunStatus::Completed).is_err());
        assert!(validate_run_transition(RunStatus::Completed, RunStatus::Executing).is_err());
        assert!(validate_run_transition(RunStatus::Failed, RunStatus::Executing).is_err());
    }

    #[test]
    fn readiness_tracks_completed_dependencies() {
        let plan = diamond_plan();
        let mut states = fresh_states(&plan);

        let ready: Vec<&str> = ready_steps(&plan, &states).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["fetch"]);

        mark(&mut states, "fetch", StepStatus::Completed);
        let ready: Vec<&str> = ready_steps(&plan, &states).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["parse", "store"]);

        mark(&mut states, "parse", StepStatus::Completed);
        mark(&mut states, "store", StepStatus::Completed);
        let ready: Vec<&str> = ready_steps(&plan, &states).iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ready, vec!["notify"]);
    }

    #[test]
    fn a_failed_dependency_never_becomes_ready() {
        let plan = diamond_plan();
        let mut states = fresh_states(&plan);
        mark(&mut states, "fetch", StepStatus::Failed);

        assert!(ready_steps(&plan, &states).is_empty());
        assert!(!outstanding_steps(&plan, &states).is_empty());
    }

    #[test]
    fn deadlock_detection_only_fires_with_outstanding_steps() {
        let plan = diamond_plan();
        let mut states = fresh_states(&plan);

        assert!(!is_deadlocked(&plan, &states));

        for id in ["fetch", "parse", "store", "notify"] {
            mark(&mut states, id, StepStatus::Completed);
        }
        assert!(!is_deadlocked(&plan, &states));
    }

    #[test]
    fn references_resolve_against_recorded_outputs() {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "url".to_owned(),
            StepParameter::from_value(json!("$fetch.body.links.0")),
        );
        parameters.insert("retries".to_owned(), StepParameter::from_value(json!(2)));
        let step = PlanStep {
            id: "parse".to_owned(),
            tool_name: "json_parse".to_owned(),
            parameters,
            dependencies: vec!["fetch".to_owned()],
            timeout_ms: 30_000,
        };

        let mut outputs = BTreeMap::new();
        outputs.insert(
            "fetch".to_owned(),
            json!({"body": {"links": ["https://example.test/a"]}}),
        );

        let resolved = resolve_parameters(&step, &outputs);
        assert_eq!(resolved["url"], json!("https://example.test/a"));
        assert_eq!(resolved["retries"], json!(2));
    }

    #[test]
    fn unresolved_references_restore_their_literal_form() {
        let mut parameters = BTreeMap::new();
        parameters.insert(
            "missing".to_owned(),
            StepParameter::from_value(json!("$fetch.body.absent")),
        );
        let step = PlanStep {
            id: "parse".to_owned(),
            tool_name: "json_parse".to_owned(),
            parameters,
            dependencies: vec!["fetch".to_owned()],
            timeout_ms: 30_000,
        };

        let resolved = resolve_parameters(&step, &BTreeMap::new());
        assert_eq!(resolved["missing"], json!("$fetch.body.absent"));
    }
}
