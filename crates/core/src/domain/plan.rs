use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A single parameter of a plan step. References are resolved against the
/// recorded output of a completed dependency at dispatch time, never at
/// authoring time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepParameter {
    Literal { value: Value },
    Reference { step_id: String, path: String },
}

impl StepParameter {
    /// Parses the external `$stepId.fieldPath` convention into the closed
    /// tagged form. Anything that is not a `$`-prefixed string stays literal.
    pub fn from_value(value: Value) -> Self {
        if let Value::String(text) = &value {
            if let Some(reference) = text.strip_prefix('$') {
                let (step_id, path) = match reference.split_once('.') {
                    Some((step_id, path)) => (step_id, path),
                    None => (reference, ""),
                };
                if !step_id.is_empty() {
                    return Self::Reference {
                        step_id: step_id.to_owned(),
                        path: path.to_owned(),
                    };
                }
            }
        }
        Self::Literal { value }
    }

    /// The external wire form: references render back to `$stepId.fieldPath`.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Literal { value } => value.clone(),
            Self::Reference { step_id, path } => {
                if path.is_empty() {
                    Value::String(format!("${step_id}"))
                } else {
                    Value::String(format!("${step_id}.{path}"))
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub tool_name: String,
    pub parameters: BTreeMap<String, StepParameter>,
    pub dependencies: Vec<String>,
    pub timeout_ms: u64,
}

/// A validated directed acyclic graph of tool-invocation steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

/// Untrusted plan as returned by the external generator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPlan {
    pub steps: Vec<RawPlanStep>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPlanStep {
    pub id: String,
    pub tool_name: String,
    pub parameters: BTreeMap<String, Value>,
    pub dependencies: Vec<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("plan has no steps")]
    EmptyPlan,
    #[error("plan step has an empty id")]
    EmptyStepId,
    #[error("duplicate step id: {0}")]
    DuplicateStepId(String),
    #[error("step {step_id} has an empty tool name")]
    EmptyToolName { step_id: String },
    #[error("step {step_id} declares unknown dependency {dependency}")]
    UnknownDependency { step_id: String, dependency: String },
    #[error("step {step_id} depends on itself")]
    SelfDependency { step_id: String },
    #[error("step {step_id} references unknown step {referenced}")]
    UnknownReference { step_id: String, referenced: String },
}

impl Plan {
    /// Accepts an untrusted plan: parses `$stepId.path` parameter strings
    /// into tagged references and validates the dependency graph.
    pub fn from_raw(raw: RawPlan, default_timeout_ms: u64) -> Result<Self, PlanValidationError> {
        let steps = raw
            .steps
            .into_iter()
            .map(|step| PlanStep {
                id: step.id,
                tool_name: step.tool_name,
                parameters: step
                    .parameters
                    .into_iter()
                    .map(|(name, value)| (name, StepParameter::from_value(value)))
                    .collect(),
                dependencies: step.dependencies,
                timeout_ms: step.timeout_ms.unwrap_or(default_timeout_ms),
            })
            .collect();

        let plan = Self { steps };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.steps.is_empty() {
            return Err(PlanValidationError::EmptyPlan);
        }

        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if step.id.is_empty() {
                return Err(PlanValidationError::EmptyStepId);
            }
            if !seen.insert(step.id.as_str()) {
                return Err(PlanValidationError::DuplicateStepId(step.id.clone()));
            }
            if step.tool_name.is_empty() {
                return Err(PlanValidationError::EmptyToolName { step_id: step.id.clone() });
            }
        }

        for step in &self.steps {
            for dependency in &step.dependencies {
                if dependency == &step.id {
                    return Err(PlanValidationError::SelfDependency { step_id: step.id.clone() });
                }
                if !seen.contains(dependency.as_str()) {
                    return Err(PlanValidationError::UnknownDependency {
                        step_id: step.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
            for parameter in step.parameters.values() {
                if let StepParameter::Reference { step_id: referenced, .. } = parameter {
                    if !seen.contains(referenced.as_str()) {
                        return Err(PlanValidationError::UnknownReference {
                            step_id: step.id.clone(),
                            referenced: referenced.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|step| step.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_step(id: &str, deps: &[&str]) -> RawPlanStep {
        RawPlanStep {
            id: id.to_owned(),
            tool_name: "search_web".to_owned(),
            parameters: BTreeMap::new(),
            dependencies: deps.iter().map(|dep| (*dep).to_owned()).collect(),
            timeout_ms: None,
        }
    }

    #[test]
    fn parameter_strings_with_dollar_prefix_become_references() {
        let parameter = StepParameter::from_value(json!("$step1.result.name"));
        assert_eq!(
            parameter,
            StepParameter::Reference {
                step_id: "step1".to_owned(),
                path: "result.name".to_owned()
            }
        );
        assert_eq!(parameter.to_wire(), json!("$step1.result.name"));
    }

    #[test]
    fn non_reference_values_stay_literal() {
        assert_eq!(
            StepParameter::from_value(json!("plain text")),
            StepParameter::Literal { value: json!("plain text") }
        );
        assert_eq!(
            StepParameter::from_value(json!(42)),
            StepParameter::Literal { value: json!(42) }
        );
        // A bare "$" has no step id to reference.
        assert_eq!(
            StepParameter::from_value(json!("$")),
            StepParameter::Literal { value: json!("$") }
        );
    }

    #[test]
    fn from_raw_applies_default_timeout_and_validates() {
        let raw = RawPlan { steps: vec![raw_step("a", &[]), raw_step("b", &["a"])] };
        let plan = Plan::from_raw(raw, 5_000).expect("valid plan");
        assert_eq!(plan.steps[0].timeout_ms, 5_000);
        assert_eq!(plan.steps[1].dependencies, vec!["a".to_owned()]);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let raw = RawPlan { steps: vec![raw_step("a", &["ghost"])] };
        assert_eq!(
            Plan::from_raw(raw, 5_000).unwrap_err(),
            PlanValidationError::UnknownDependency {
                step_id: "a".to_owned(),
                dependency: "ghost".to_owned()
            }
        );
    }

    #[test]
    fn self_dependency_is_rejected() {
        let raw = RawPlan { steps: vec![raw_step("a", &["a"])] };
        assert_eq!(
            Plan::from_raw(raw, 5_000).unwrap_err(),
            PlanValidationError::SelfDependency { step_id: "a".to_owned() }
        );
    }

    #[test]
    fn embedded_reference_to_unknown_step_is_rejected() {
        let mut step = raw_step("a", &[]);
        step.parameters.insert("name".to_owned(), json!("$ghost.output"));
        let raw = RawPlan { steps: vec![step] };
        assert_eq!(
            Plan::from_raw(raw, 5_000).unwrap_err(),
            PlanValidationError::UnknownReference {
                step_id: "a".to_owned(),
                referenced: "ghost".to_owned()
            }
        );
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let raw = RawPlan { steps: vec![raw_step("a", &[]), raw_step("a", &[])] };
        assert_eq!(
            Plan::from_raw(raw, 5_000).unwrap_err(),
            PlanValidationError::DuplicateStepId("a".to_owned())
        );
    }
}
