//! Deterministic intent repair and validation.
//!
//! The normalizer never rejects input: it coerces, defaults, and downgrades
//! fields in a fixed pass order and records every correction with a
//! machine-readable reason code. That change log is the audit trail.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::intent::{
    Confidence, Constraint, ConstraintType, Intent, IntentType, Preferences, RawIntent, RawTrace,
    RejectedInterpretation, Temporal, Trace,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationMode {
    /// Full validation, including temporal coherence. The default.
    #[default]
    Strict,
    /// Skips the temporal-expiry check; used when re-validating historical
    /// snapshots during replay.
    Lenient,
}

/// Machine-readable reason for a single normalization correction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    UnknownIntentTypeCoerced,
    UnknownConstraintTypeNulled,
    MissingProvenFlagDefaulted,
    InvalidPreferencesReset,
    InvalidConfidenceReset,
    CreatedAtStamped,
    ExpiresAtDerived,
    MissingInputSourceDefaulted,
    InvalidRejectedInterpretationDropped,
    SyntheticRejectedInterpretationAppended,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationChange {
    pub field: String,
    pub reason: ChangeReason,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalizationResult {
    pub normalized: Intent,
    pub original: RawIntent,
    pub changes: Vec<NormalizationChange>,
    pub validated: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct IntentNormalizer {
    mode: NormalizationMode,
}

impl IntentNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: NormalizationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> NormalizationMode {
        self.mode
    }

    /// Runs the fixed-order repair passes. Pure given `reference_time`,
    /// which is only consulted by the `createdAt` stamping pass.
    pub fn normalize(&self, raw: RawIntent, reference_time: DateTime<Utc>) -> NormalizationResult {
        let original = raw.clone();
        let mut changes = Vec::new();

        // Pass 1: coerce an unknown or missing type to UNKNOWN.
        let intent_type = match raw.intent_type.as_deref() {
            Some(text) => match IntentType::parse(text) {
                Some(parsed) => parsed,
                None => {
                    changes.push(NormalizationChange {
                        field: "type".to_owned(),
                        reason: ChangeReason::UnknownIntentTypeCoerced,
                        before: Some(Value::String(text.to_owned())),
                        after: Some(Value::String("UNKNOWN".to_owned())),
                    });
                    IntentType::Unknown
                }
            },
            None => {
                changes.push(NormalizationChange {
                    field: "type".to_owned(),
                    reason: ChangeReason::UnknownIntentTypeCoerced,
                    before: None,
                    after: Some(Value::String("UNKNOWN".to_owned())),
                });
                IntentType::Unknown
            }
        };

        // Pass 2: null out unknown constraint types, default missing proven flags.
        let mut explicit_constraints = Vec::with_capacity(raw.explicit_constraints.len());
        for (index, constraint) in raw.explicit_constraints.iter().enumerate() {
            let (constraint_type, type_nulled) = match constraint.constraint_type.as_deref() {
                Some(text) => match ConstraintType::parse(text) {
                    Some(parsed) => (Some(parsed), false),
                    None => {
                        changes.push(NormalizationChange {
                            field: format!("explicitConstraints[{index}].type"),
                            reason: ChangeReason::UnknownConstraintTypeNulled,
                            before: Some(Value::String(text.to_owned())),
                            after: Some(Value::Null),
                        });
                        (None, true)
                    }
                },
                // An already-nulled constraint is only re-touched if it still
                // claims to be proven.
                None => (None, false),
            };

            let proven = if type_nulled {
                false
            } else {
                match constraint.proven {
                    Some(proven) if constraint_type.is_none() && proven => {
                        changes.push(NormalizationChange {
                            field: format!("explicitConstraints[{index}].proven"),
                            reason: ChangeReason::UnknownConstraintTypeNulled,
                            before: Some(Value::Bool(true)),
                            after: Some(Value::Bool(false)),
                        });
                        false
                    }
                    Some(proven) => proven,
                    None => {
                        changes.push(NormalizationChange {
                            field: format!("explicitConstraints[{index}].proven"),
                            reason: ChangeReason::MissingProvenFlagDefaulted,
                            before: None,
                            after: Some(Value::Bool(false)),
                        });
                        false
                    }
                }
            };

            explicit_constraints.push(Constraint {
                constraint_type,
                value: constraint.value.clone(),
                proven,
                validated_by: constraint.validated_by.clone(),
            });
        }

        // Pass 3: reset invalid or missing preferences to the safe default.
        let preferences = match raw
            .preferences
            .as_ref()
            .and_then(|value| serde_json::from_value::<Preferences>(value.clone()).ok())
        {
            Some(preferences) => preferences,
            None => {
                changes.push(NormalizationChange {
                    field: "preferences".to_owned(),
                    reason: ChangeReason::InvalidPreferencesReset,
                    before: raw.preferences.clone(),
                    after: serde_json::to_value(Preferences::default()).ok(),
                });
                Preferences::default()
            }
        };

        // Pass 4: reset invalid or missing confidence to the zero default.
        let confidence = match raw
            .confidence
            .as_ref()
            .and_then(|value| serde_json::from_value::<Confidence>(value.clone()).ok())
            .filter(Confidence::is_valid)
        {
            Some(confidence) => confidence,
            None => {
                changes.push(NormalizationChange {
                    field: "confidence".to_owned(),
                    reason: ChangeReason::InvalidConfidenceReset,
                    before: raw.confidence.clone(),
                    after: serde_json::to_value(Confidence::zero()).ok(),
                });
                Confidence::zero()
            }
        };

        // Pass 5: stamp createdAt if absent. This is the single
        // non-deterministic pass and is excluded from determinism checks.
        let mut temporal = raw.temporal.clone().unwrap_or_default();
        if temporal.created_at.is_none() {
            temporal.created_at = Some(reference_time);
            changes.push(NormalizationChange {
                field: "temporal.createdAt".to_owned(),
                reason: ChangeReason::CreatedAtStamped,
                before: None,
                after: Some(Value::String(reference_time.to_rfc3339())),
            });
        }

        // Pass 6: derive expiresAt when absent but derivable.
        if temporal.expires_at.is_none() {
            if let (Some(created_at), Some(duration_ms)) =
                (temporal.created_at, temporal.validity_duration_ms)
            {
                let expires_at = created_at + Duration::milliseconds(duration_ms);
                temporal.expires_at = Some(expires_at);
                changes.push(NormalizationChange {
                    field: "temporal.expiresAt".to_owned(),
                    reason: ChangeReason::ExpiresAtDerived,
                    before: None,
                    after: Some(Value::String(expires_at.to_rfc3339())),
                });
            }
        }

        // Pass 7: default a missing trace input source.
        let trace = match raw.trace.clone() {
            Some(RawTrace { input_source, raw_text, context, generation_metadata }) => {
                let input_source = match input_source.filter(|source| !source.is_empty()) {
                    Some(source) => source,
                    None => {
                        changes.push(NormalizationChange {
                            field: "trace.inputSource".to_owned(),
                            reason: ChangeReason::MissingInputSourceDefaulted,
                            before: None,
                            after: Some(Value::String("unknown".to_owned())),
                        });
                        "unknown".to_owned()
                    }
                };
                Trace {
                    input_source,
                    raw_text: raw_text.unwrap_or_default(),
                    context,
                    generation_metadata,
                }
            }
            None => {
                changes.push(NormalizationChange {
                    field: "trace.inputSource".to_owned(),
                    reason: ChangeReason::MissingInputSourceDefaulted,
                    before: None,
                    after: Some(Value::String("unknown".to_owned())),
                });
                Trace::default()
            }
        };

        // Pass 8: drop structurally invalid rejected interpretations; the
        // invariant demands at least one entry, so append a synthetic one if
        // the list ends up empty.
        let mut rejected_interpretations = Vec::new();
        for (index, entry) in raw.rejected_interpretations.iter().enumerate() {
            match serde_json::from_value::<RejectedInterpretation>(entry.clone()) {
                Ok(parsed) if parsed.is_valid() => rejected_interpretations.push(parsed),
                _ => {
                    changes.push(NormalizationChange {
                        field: format!("rejectedInterpretations[{index}]"),
                        reason: ChangeReason::InvalidRejectedInterpretationDropped,
                        before: Some(entry.clone()),
                        after: None,
                    });
                }
            }
        }
        if rejected_interpretations.is_empty() {
            let synthetic = RejectedInterpretation::synthetic();
            changes.push(NormalizationChange {
                field: "rejectedInterpretations".to_owned(),
                reason: ChangeReason::SyntheticRejectedInterpretationAppended,
                before: None,
                after: serde_json::to_value(&synthetic).ok(),
            });
            rejected_interpretations.push(synthetic);
        }

        let normalized = Intent {
            id: raw.id.clone().unwrap_or_default(),
            version: raw.version.unwrap_or(0),
            intent_type,
            primary_goal: raw.primary_goal.clone().unwrap_or_default(),
            explicit_constraints,
            preferences,
            confidence,
            temporal,
            trace,
            rejected_interpretations,
            ambiguities: raw.ambiguities.clone(),
        };

        let validated = validation_issues(&normalized, self.mode).is_empty();

        NormalizationResult { normalized, original, changes, validated }
    }
}

/// Post-condition checks re-run against the corrected intent: schema,
/// required fields, temporal coherence, rejected-interpretation invariant.
pub fn validation_issues(intent: &Intent, mode: NormalizationMode) -> Vec<String> {
    let mut issues = Vec::new();

    if intent.id.is_empty() {
        issues.push("missing required field: id".to_owned());
    }
    if intent.version < 1 {
        issues.push("version must be positive".to_owned());
    }
    if intent.primary_goal.is_empty() {
        issues.push("missing required field: primaryGoal".to_owned());
    }
    if intent.trace.raw_text.is_empty() {
        issues.push("missing required field: trace.rawText".to_owned());
    }
    if !intent.confidence.is_valid() {
        issues.push("confidence score out of range".to_owned());
    }
    for (index, constraint) in intent.explicit_constraints.iter().enumerate() {
        if constraint.constraint_type.is_none() && constraint.proven {
            issues.push(format!("constraint {index} has a nulled type but claims proven"));
        }
    }
    if intent.temporal.created_at.is_none() {
        issues.push("missing required field: temporal.createdAt".to_owned());
    }
    if mode == NormalizationMode::Strict {
        if let (Some(created_at), Some(expires_at)) =
            (intent.temporal.created_at, intent.temporal.expires_at)
        {
            if expires_at < created_at {
                issues.push("temporal incoherence: expiresAt precedes createdAt".to_owned());
            }
        }
    }
    if intent.rejected_interpretations.is_empty() {
        issues.push("normalized intent must carry a rejected interpretation".to_owned());
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::intent::RawConstraint;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    fn well_formed_raw() -> RawIntent {
        RawIntent {
            id: Some("intent-1".to_owned()),
            version: Some(1),
            intent_type: Some("SCHEDULE".to_owned()),
            primary_goal: Some("schedule meeting at 2pm tomorrow".to_owned()),
            explicit_constraints: vec![RawConstraint {
                constraint_type: Some("TEMPORAL".to_owned()),
                value: json!("tomorrow"),
                proven: Some(true),
                validated_by: Some("keyword_heuristic".to_owned()),
            }],
            preferences: serde_json::to_value(Preferences::default()).ok(),
            confidence: serde_json::to_value(Confidence::zero()).ok(),
            temporal: Some(Temporal {
                created_at: Some(fixed_time()),
                expires_at: None,
                validity_duration_ms: None,
            }),
            trace: Some(RawTrace {
                input_source: Some("user_text".to_owned()),
                raw_text: Some("schedule meeting at 2pm tomorrow".to_owned()),
                context: Default::default(),
                generation_metadata: Default::default(),
            }),
            rejected_interpretations: vec![json!({
                "type": "QUERY",
                "reason": "weaker keyword support",
                "confidence": 0.2
            })],
            ambiguities: Vec::new(),
        }
    }

    #[test]
    fn unknown_intent_type_is_coerced_to_unknown() {
        let mut raw = well_formed_raw();
        raw.intent_type = Some("RESERVATION".to_owned());

        let result = IntentNormalizer::new().normalize(raw, fixed_time());

        assert_eq!(result.normalized.intent_type, IntentType::Unknown);
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::UnknownIntentTypeCoerced));
    }

    #[test]
    fn unknown_constraint_type_is_nulled_and_unproven() {
        let mut raw = well_formed_raw();
        raw.explicit_constraints.push(RawConstraint {
            constraint_type: Some("VIBE".to_owned()),
            value: json!("cozy"),
            proven: Some(true),
            validated_by: None,
        });

        let result = IntentNormalizer::new().normalize(raw, fixed_time());
        let nulled = &result.normalized.explicit_constraints[1];

        assert_eq!(nulled.constraint_type, None);
        assert!(!nulled.proven);
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::UnknownConstraintTypeNulled));
    }

    #[test]
    fn missing_proven_flag_defaults_to_false() {
        let mut raw = well_formed_raw();
        raw.explicit_constraints[0].proven = None;

        let result = IntentNormalizer::new().normalize(raw, fixed_time());

        assert!(!result.normalized.explicit_constraints[0].proven);
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::MissingProvenFlagDefaulted));
    }

    #[test]
    fn invalid_preferences_and_confidence_are_reset() {
        let mut raw = well_formed_raw();
        raw.preferences = Some(json!("not an object"));
        raw.confidence = Some(json!({"score": 7.5, "method": "broken"}));

        let result = IntentNormalizer::new().normalize(raw, fixed_time());

        assert_eq!(result.normalized.preferences, Preferences::default());
        assert_eq!(result.normalized.confidence.score, 0.0);
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::InvalidPreferencesReset));
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::InvalidConfidenceReset));
    }

    #[test]
    fn missing_created_at_is_stamped_with_reference_time() {
        let mut raw = well_formed_raw();
        raw.temporal = None;

        let result = IntentNormalizer::new().normalize(raw, fixed_time());

        assert_eq!(result.normalized.temporal.created_at, Some(fixed_time()));
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::CreatedAtStamped));
    }

    #[test]
    fn expires_at_is_derived_from_validity_duration() {
        let mut raw = well_formed_raw();
        raw.temporal = Some(Temporal {
            created_at: Some(fixed_time()),
            expires_at: None,
            validity_duration_ms: Some(60_000),
        });

        let result = IntentNormalizer::new().normalize(raw, fixed_time());

        assert_eq!(
            result.normalized.temporal.expires_at,
            Some(fixed_time() + Duration::milliseconds(60_000))
        );
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::ExpiresAtDerived));
    }

    #[test]
    fn invalid_rejected_interpretations_are_dropped_and_synthetic_appended() {
        let mut raw = well_formed_raw();
        raw.rejected_interpretations =
            vec![json!({"type": "NOT_A_TYPE", "reason": "", "confidence": 3.0})];

        let result = IntentNormalizer::new().normalize(raw, fixed_time());

        assert_eq!(result.normalized.rejected_interpretations.len(), 1);
        assert_eq!(
            result.normalized.rejected_interpretations[0],
            RejectedInterpretation::synthetic()
        );
        assert!(result
            .changes
            .iter()
            .any(|change| change.reason == ChangeReason::InvalidRejectedInterpretationDropped));
        assert!(result.changes.iter().any(|change| {
            change.reason == ChangeReason::SyntheticRejectedInterpretationAppended
        }));
    }

    #[test]
    fn normalizing_a_normalized_valid_intent_is_changeless() {
        let normalizer = IntentNormalizer::new();
        let first = normalizer.normalize(well_formed_raw(), fixed_time());
        assert!(first.validated, "fixture should validate: {:?}", first.changes);
        assert!(first.changes.is_empty());

        let second =
            normalizer.normalize(RawIntent::from(first.normalized.clone()), fixed_time());

        assert!(second.changes.is_empty(), "unexpected changes: {:?}", second.changes);
        assert!(second.validated);
        assert_eq!(second.normalized, first.normalized);
    }

    #[test]
    fn empty_raw_text_fails_validation() {
        let mut raw = well_formed_raw();
        raw.primary_goal = Some(String::new());
        raw.trace = Some(RawTrace {
            input_source: Some("user_text".to_owned()),
            raw_text: Some(String::new()),
            context: Default::default(),
            generation_metadata: Default::default(),
        });

        let result = IntentNormalizer::new().normalize(raw, fixed_time());

        assert!(!result.validated);
    }

    #[test]
    fn lenient_mode_tolerates_expired_snapshots() {
        let mut raw = well_formed_raw();
        raw.temporal = Some(Temporal {
            created_at: Some(fixed_time()),
            expires_at: Some(fixed_time() - Duration::hours(1)),
            validity_duration_ms: None,
        });

        let strict = IntentNormalizer::new().normalize(raw.clone(), fixed_time());
        let lenient = IntentNormalizer::with_mode(NormalizationMode::Lenient)
            .normalize(raw, fixed_time());

        assert!(!strict.validated);
        assert!(lenient.validated);
    }

    #[test]
    fn identical_inputs_yield_identical_results() {
        let normalizer = IntentNormalizer::new();
        let mut raw = well_formed_raw();
        raw.intent_type = Some("definitely-not-a-type".to_owned());
        raw.explicit_constraints[0].proven = None;

        let first = normalizer.normalize(raw.clone(), fixed_time());
        let second = normalizer.normalize(raw, fixed_time());

        assert_eq!(first, second);
    }
}
