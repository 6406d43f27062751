//! Deterministic confidence scoring.
//!
//! Five independent components in `[0, 1]` are combined under fixed weights
//! and rounded with an exact decimal rule, so the same intent and raw text
//! always score to the same value on every platform.

use std::collections::BTreeMap;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::intent::{Confidence, ConstraintType, Intent, IntentType};

/// Fixed combination weights. They sum to 1.0 by construction but the
/// combiner still divides by the actual sum so custom weightings stay sound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoringWeights {
    pub keyword: f64,
    pub temporal: f64,
    pub domain: f64,
    pub structure: f64,
    pub pattern: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self { keyword: 0.30, temporal: 0.25, domain: 0.20, structure: 0.15, pattern: 0.10 }
    }
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.keyword + self.temporal + self.domain + self.structure + self.pattern
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ComponentScores {
    pub keyword: f64,
    pub temporal: f64,
    pub domain: f64,
    pub structure: f64,
    pub pattern: f64,
}

impl ComponentScores {
    pub fn sum(&self) -> f64 {
        self.keyword + self.temporal + self.domain + self.structure + self.pattern
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ConfidenceScorer {
    weights: ScoringWeights,
}

impl ConfidenceScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Scores a normalized intent against its raw text. Pure: no clock or
    /// randomness enters the computation, and it never fails.
    pub fn score(&self, intent: &Intent, raw_text: &str) -> Confidence {
        let components = self.components(intent, raw_text);
        let score = self.combine(components);

        let mut weightings = BTreeMap::new();
        weightings.insert("keyword".to_owned(), self.weights.keyword);
        weightings.insert("temporal".to_owned(), self.weights.temporal);
        weightings.insert("domain".to_owned(), self.weights.domain);
        weightings.insert("structure".to_owned(), self.weights.structure);
        weightings.insert("pattern".to_owned(), self.weights.pattern);

        Confidence { score, method: "component_weighted".to_owned(), weightings }
    }

    pub fn components(&self, intent: &Intent, raw_text: &str) -> ComponentScores {
        let tokens = tokenize(raw_text);
        ComponentScores {
            keyword: keyword_component(intent.intent_type, &tokens),
            temporal: temporal_component(intent),
            domain: domain_component(intent),
            structure: structure_component(intent),
            pattern: pattern_component(intent.intent_type, &tokens),
        }
    }

    /// Normalizes the components to sum to 1, applies the weights, divides by
    /// the weight sum, clamps, and rounds to 4 decimals. Zero iff every
    /// component is zero.
    pub fn combine(&self, components: ComponentScores) -> f64 {
        let component_sum = components.sum();
        if component_sum <= 0.0 {
            return 0.0;
        }

        let weighted = self.weights.keyword * (components.keyword / component_sum)
            + self.weights.temporal * (components.temporal / component_sum)
            + self.weights.domain * (components.domain / component_sum)
            + self.weights.structure * (components.structure / component_sum)
            + self.weights.pattern * (components.pattern / component_sum);

        round4((weighted / self.weights.sum()).clamp(0.0, 1.0))
    }
}

/// Exact midpoint-away-from-zero rounding to 4 decimal places. Binary
/// floating point formatting is not stable enough to carry the determinism
/// guarantee, so the rounding itself happens in decimal.
pub fn round4(value: f64) -> f64 {
    Decimal::from_f64(value)
        .map(|decimal| decimal.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|decimal| decimal.to_f64())
        .unwrap_or(0.0)
}

pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect()
}

fn type_keywords(intent_type: IntentType) -> &'static [&'static str] {
    match intent_type {
        IntentType::Schedule => {
            &["schedule", "meeting", "calendar", "appointment", "remind", "tomorrow"]
        }
        IntentType::Search => &["find", "search", "look", "locate", "near", "where"],
        IntentType::Action => &["send", "create", "order", "book", "buy", "cancel"],
        IntentType::Query => &["what", "when", "who", "how", "why", "tell"],
        IntentType::Planning => &["plan", "organize", "arrange", "prepare", "itinerary", "steps"],
        IntentType::Unknown | IntentType::ClarificationNeeded => &[],
    }
}

/// Two fixed reference phrases per type, used for the known-pattern signal.
fn type_patterns(intent_type: IntentType) -> &'static [&'static str] {
    match intent_type {
        IntentType::Schedule => &["schedule meeting at", "set up a meeting"],
        IntentType::Search => &["find a place", "search for"],
        IntentType::Action => &["send a message", "place an order"],
        IntentType::Query => &["what is the", "tell me about"],
        IntentType::Planning => &["plan a trip", "organize the steps"],
        IntentType::Unknown | IntentType::ClarificationNeeded => &[],
    }
}

/// Ratio of the type's keywords that appear as tokens in the raw text.
pub(crate) fn keyword_component(intent_type: IntentType, tokens: &[String]) -> f64 {
    let keywords = type_keywords(intent_type);
    if keywords.is_empty() {
        return 0.0;
    }
    let matched = keywords
        .iter()
        .filter(|keyword| tokens.iter().any(|token| token == *keyword))
        .count();
    matched as f64 / keywords.len() as f64
}

fn temporal_component(intent: &Intent) -> f64 {
    if intent
        .explicit_constraints
        .iter()
        .any(|constraint| constraint.proven_of_type(ConstraintType::Temporal))
    {
        0.8
    } else {
        0.3
    }
}

/// Proportion of the type's required constraint kinds that are present.
/// Types with no requirement score the fixed default.
fn domain_component(intent: &Intent) -> f64 {
    let required: &[ConstraintType] = match intent.intent_type {
        IntentType::Schedule => &[ConstraintType::Temporal],
        IntentType::Search => &[ConstraintType::Location],
        IntentType::Action => &[ConstraintType::Scope],
        _ => &[],
    };
    if required.is_empty() {
        return 0.8;
    }
    let present = required
        .iter()
        .filter(|kind| {
            intent
                .explicit_constraints
                .iter()
                .any(|constraint| constraint.constraint_type == Some(**kind))
        })
        .count();
    present as f64 / required.len() as f64
}

fn structure_component(intent: &Intent) -> f64 {
    let mut component = 0.0;
    if !intent.explicit_constraints.is_empty() {
        component += 0.4;
    }
    if intent.confidence.is_valid() {
        component += 0.3;
    }
    if !intent.trace.raw_text.is_empty() {
        component += 0.2;
    }
    if !intent.rejected_interpretations.is_empty() {
        component += 0.1;
    }
    component
}

/// Average token overlap against the type's two reference phrases, each
/// floor-clamped so a recognized type never scores a hard zero here.
fn pattern_component(intent_type: IntentType, tokens: &[String]) -> f64 {
    let patterns = type_patterns(intent_type);
    if patterns.is_empty() {
        return 0.0;
    }
    let total: f64 = patterns
        .iter()
        .map(|pattern| {
            let phrase_tokens = tokenize(pattern);
            let overlap = phrase_tokens
                .iter()
                .filter(|phrase_token| tokens.contains(phrase_token))
                .count();
            let ratio = overlap as f64 / phrase_tokens.len() as f64;
            ratio.max(0.2)
        })
        .sum();
    total / patterns.len() as f64
}
