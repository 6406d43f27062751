//! Intent signatures and the deterministic replay harness.
//!
//! A signature is a serialization of a six-field projection of an intent with
//! lexicographically sorted keys. Two intents are signature-equal exactly when
//! their projections serialize identically, and the strings double as a
//! deterministic ordering key. Replay re-runs the pipeline against a stored
//! snapshot and surfaces any divergence as structured, stage-tagged errors.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::domain::execution::PipelineState;
use crate::domain::intent::{Intent, IntentType};
use crate::draft::draft_intent;
use crate::normalizer::{IntentNormalizer, NormalizationMode};
use crate::scoring::ConfidenceScorer;

/// Serializes the identity projection with lexicographically sorted keys.
pub fn create_signature(intent: &Intent) -> String {
    let mut projection: BTreeMap<&str, Value> = BTreeMap::new();
    projection.insert("createdAt", timestamp_value(intent.temporal.created_at));
    projection.insert("expiresAt", timestamp_value(intent.temporal.expires_at));
    projection.insert("id", Value::String(intent.id.clone()));
    projection.insert("primaryGoal", Value::String(intent.primary_goal.clone()));
    projection.insert("type", Value::String(intent.intent_type.as_str().to_owned()));
    projection.insert("version", Value::from(intent.version));

    serde_json::to_string(&projection).unwrap_or_default()
}

fn timestamp_value(timestamp: Option<DateTime<Utc>>) -> Value {
    match timestamp {
        Some(timestamp) => Value::String(timestamp.to_rfc3339()),
        None => Value::Null,
    }
}

/// Short stable digest of a signature, for log lines and storage keys.
pub fn signature_digest(signature: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signature.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone, Copy, Debug)]
pub struct ReplayConfig {
    /// Historical snapshots may have expired since capture, so replay
    /// defaults to lenient validation.
    pub mode: NormalizationMode,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self { mode: NormalizationMode::Lenient }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStage {
    StateVerification,
    SignatureVerification,
    PipelineReplay,
}

impl ReplayStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StateVerification => "state_verification",
            Self::SignatureVerification => "signature_verification",
            Self::PipelineReplay => "pipeline_replay",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayError {
    pub stage: ReplayStage,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub replayed_intent: Option<Intent>,
    pub errors: Vec<ReplayError>,
    pub was_successful: bool,
}

/// Pre-flight completeness check. Replay refuses an incomplete snapshot
/// rather than reporting a spurious mismatch against garbage.
pub fn verify_state_integrity(state: &PipelineState) -> Vec<String> {
    let mut issues = Vec::new();

    if state.raw_text.is_empty() {
        issues.push("snapshot has no raw text".to_owned());
    }
    if state.intent.version < 1 {
        issues.push("snapshot intent version is not positive".to_owned());
    }
    if state.intent.primary_goal.is_empty() {
        issues.push("snapshot intent has no primary goal".to_owned());
    }
    if state.intent.explicit_constraints.is_empty() {
        issues.push("snapshot intent has no constraints".to_owned());
    }
    if state.intent.temporal.created_at.is_none() {
        issues.push("snapshot intent has no createdAt".to_owned());
    }

    issues
}

/// Re-runs normalization and scoring against the snapshot intent and declares
/// success iff the recomputed signature matches the stored one. Divergence is
/// reported, never thrown and never auto-corrected.
pub fn replay(raw_text: &str, state: &PipelineState, config: &ReplayConfig) -> ReplayOutcome {
    let integrity_issues = verify_state_integrity(state);
    if !integrity_issues.is_empty() {
        return ReplayOutcome {
            replayed_intent: None,
            errors: integrity_issues
                .into_iter()
                .map(|message| ReplayError { stage: ReplayStage::StateVerification, message })
                .collect(),
            was_successful: false,
        };
    }

    let mut errors = Vec::new();

    let normalization = IntentNormalizer::with_mode(config.mode)
        .normalize(state.raw_intent(), state.timestamp);
    if !normalization.validated {
        errors.push(ReplayError {
            stage: ReplayStage::PipelineReplay,
            message: "snapshot intent failed re-validation".to_owned(),
        });
    }

    let confidence = ConfidenceScorer::new().score(&normalization.normalized, raw_text);
    if confidence.score != state.confidence_result.score {
        errors.push(ReplayError {
            stage: ReplayStage::PipelineReplay,
            message: format!(
                "recomputed confidence {} differs from stored {}",
                confidence.score, state.confidence_result.score
            ),
        });
    }

    let signature = create_signature(&normalization.normalized);
    if signature != state.signature {
        errors.push(ReplayError {
            stage: ReplayStage::SignatureVerification,
            message: format!(
                "recomputed signature digest {} does not match stored digest {}",
                signature_digest(&signature),
                signature_digest(&state.signature)
            ),
        });
    }

    ReplayOutcome {
        replayed_intent: Some(normalization.normalized),
        was_successful: errors.is_empty(),
        errors,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayComparison {
    pub identical: bool,
    pub differences: Vec<String>,
}

/// Field-level diff between two replay outcomes.
pub fn compare_replay_results(a: &ReplayOutcome, b: &ReplayOutcome) -> ReplayComparison {
    let mut differences = Vec::new();

    match (&a.replayed_intent, &b.replayed_intent) {
        (Some(left), Some(right)) => {
            if left.intent_type != right.intent_type {
                differences.push("type".to_owned());
            }
            if left.primary_goal != right.primary_goal {
                differences.push("primaryGoal".to_owned());
            }
            if left.explicit_constraints != right.explicit_constraints {
                differences.push("explicitConstraints".to_owned());
            }
            if left.confidence != right.confidence {
                differences.push("confidence".to_owned());
            }
            if left.temporal != right.temporal {
                differences.push("temporal".to_owned());
            }
            if left.trace != right.trace {
                differences.push("trace".to_owned());
            }
        }
        (None, None) => {}
        _ => differences.push("replayedIntent".to_owned()),
    }

    ReplayComparison { identical: differences.is_empty(), differences }
}

/// Runs draft → normalize → score → sign `runs` times for the same input and
/// returns the distinct signatures observed. A healthy pipeline returns a
/// single-element set.
pub fn determinism_probe(
    raw_text: &str,
    intent_type: IntentType,
    runs: usize,
    reference_time: DateTime<Utc>,
) -> BTreeSet<String> {
    let normalizer = IntentNormalizer::new();
    let scorer = ConfidenceScorer::new();

    (0..runs)
        .map(|_| {
            let draft = draft_intent(raw_text, intent_type, reference_time);
            let mut normalized = normalizer.normalize(draft, reference_time).normalized;
            normalized.confidence = scorer.score(&normalized, raw_text);
            create_signature(&normalized)
        })
        .collect()
}
