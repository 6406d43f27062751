//! Full classification pipeline: draft, normalize, score, sign.
//!
//! The pipeline is a pure function of `(raw_text, intent_type,
//! reference_time)`. Running it twice with the same inputs yields
//! byte-identical snapshots.

use chrono::{DateTime, Utc};

use crate::domain::execution::PipelineState;
use crate::domain::intent::IntentType;
use crate::draft::draft_intent;
use crate::normalizer::IntentNormalizer;
use crate::scoring::ConfidenceScorer;
use crate::signature::create_signature;

pub fn run_pipeline(
    raw_text: &str,
    intent_type: IntentType,
    reference_time: DateTime<Utc>,
) -> PipelineState {
    let draft = draft_intent(raw_text, intent_type, reference_time);
    let normalization = IntentNormalizer::new().normalize(draft, reference_time);

    let mut intent = normalization.normalized.clone();
    intent.confidence = ConfidenceScorer::new().score(&intent, raw_text);
    let confidence = intent.confidence.clone();
    let signature = create_signature(&intent);

    PipelineState {
        raw_text: raw_text.to_owned(),
        intent_type,
        intent,
        normalization_result: normalization,
        confidence_result: confidence,
        signature,
        timestamp: reference_time,
    }
}
