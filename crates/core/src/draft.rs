//! Deterministic intent drafting from raw text.
//!
//! Drafting is a keyword heuristic, not an understanding step: it produces a
//! loosely-typed [`RawIntent`] that the normalizer and scorer then harden.
//! Given the same text, type, and reference time, the draft is byte-identical.

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::intent::{ConstraintType, IntentType, RawConstraint, RawIntent, RawTrace};
use crate::scoring::{keyword_component, round4, tokenize};

const HEURISTIC_SOURCE: &str = "keyword_heuristic";

const TEMPORAL_MARKERS: &[&str] =
    &["today", "tomorrow", "tonight", "am", "pm", "monday", "friday", "weekend", "noon"];
const LOCATION_MARKERS: &[&str] = &["near", "nearby", "downtown", "office", "home", "city"];
const BUDGET_MARKERS: &[&str] = &["cheap", "budget", "under", "affordable", "free"];

/// Drafts a raw intent for `raw_text` under the asserted `intent_type`.
pub fn draft_intent(
    raw_text: &str,
    intent_type: IntentType,
    reference_time: DateTime<Utc>,
) -> RawIntent {
    let tokens = tokenize(raw_text);

    let mut explicit_constraints = Vec::new();
    for (kind, markers) in [
        (ConstraintType::Temporal, TEMPORAL_MARKERS),
        (ConstraintType::Location, LOCATION_MARKERS),
        (ConstraintType::Budget, BUDGET_MARKERS),
    ] {
        let matched: Vec<&str> = markers
            .iter()
            .filter(|marker| tokens.iter().any(|token| token == *marker))
            .copied()
            .collect();
        if !matched.is_empty() {
            explicit_constraints.push(RawConstraint {
                constraint_type: Some(kind.as_str().to_owned()),
                value: json!(matched.join(" ")),
                proven: Some(true),
                validated_by: Some(HEURISTIC_SOURCE.to_owned()),
            });
        }
    }

    // Every competing type with keyword support is recorded as rejected, so
    // the audit trail shows what the draft decided against.
    let rejected_interpretations = IntentType::all()
        .iter()
        .filter(|candidate| **candidate != intent_type)
        .filter_map(|candidate| {
            let support = keyword_component(*candidate, &tokens);
            if support > 0.0 {
                Some(json!({
                    "type": candidate.as_str(),
                    "reason": "weaker keyword support",
                    "confidence": round4(support * 0.5),
                }))
            } else {
                None
            }
        })
        .collect();

    RawIntent {
        id: Some(draft_id(raw_text, intent_type)),
        version: Some(1),
        intent_type: Some(intent_type.as_str().to_owned()),
        primary_goal: Some(raw_text.to_owned()),
        explicit_constraints,
        preferences: None,
        confidence: None,
        temporal: Some(crate::domain::intent::Temporal {
            created_at: Some(reference_time),
            expires_at: None,
            validity_duration_ms: None,
        }),
        trace: Some(RawTrace {
            input_source: Some("user_text".to_owned()),
            raw_text: Some(raw_text.to_owned()),
            context: Default::default(),
            generation_metadata: Default::default(),
        }),
        rejected_interpretations,
        ambiguities: Vec::new(),
    }
}

/// Content-derived id so identical drafts carry identical identities.
fn draft_id(raw_text: &str, intent_type: IntentType) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_text.as_bytes());
    hasher.update(b"|");
    hasher.update(intent_type.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("intent-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn identical_inputs_draft_identical_intents() {
        let first = draft_intent("schedule meeting at 2pm tomorrow", IntentType::Schedule, fixed_time());
        let second = draft_intent("schedule meeting at 2pm tomorrow", IntentType::Schedule, fixed_time());

        assert_eq!(first, second);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn temporal_markers_produce_a_proven_temporal_constraint() {
        let draft = draft_intent("schedule meeting at 2pm tomorrow", IntentType::Schedule, fixed_time());

        let temporal = draft
            .explicit_constraints
            .iter()
            .find(|constraint| constraint.constraint_type.as_deref() == Some("TEMPORAL"))
            .expect("temporal constraint");
        assert_eq!(temporal.proven, Some(true));
        assert_eq!(temporal.validated_by.as_deref(), Some(HEURISTIC_SOURCE));
    }

    #[test]
    fn different_text_yields_a_different_id() {
        let a = draft_intent("schedule meeting at 2pm tomorrow", IntentType::Schedule, fixed_time());
        let b = draft_intent("schedule lunch at noon", IntentType::Schedule, fixed_time());

        assert_ne!(a.id, b.id);
    }

    #[test]
    fn competing_types_are_recorded_as_rejected() {
        let draft = draft_intent(
            "find a place to schedule a meeting",
            IntentType::Schedule,
            fixed_time(),
        );

        assert!(draft
            .rejected_interpretations
            .iter()
            .any(|entry| entry["type"] == "SEARCH"));
    }
}
