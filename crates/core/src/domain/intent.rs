use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical classification of a parsed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    Schedule,
    Search,
    Action,
    Query,
    Planning,
    Unknown,
    ClarificationNeeded,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "SCHEDULE",
            Self::Search => "SEARCH",
            Self::Action => "ACTION",
            Self::Query => "QUERY",
            Self::Planning => "PLANNING",
            Self::Unknown => "UNKNOWN",
            Self::ClarificationNeeded => "CLARIFICATION_NEEDED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SCHEDULE" => Some(Self::Schedule),
            "SEARCH" => Some(Self::Search),
            "ACTION" => Some(Self::Action),
            "QUERY" => Some(Self::Query),
            "PLANNING" => Some(Self::Planning),
            "UNKNOWN" => Some(Self::Unknown),
            "CLARIFICATION_NEEDED" => Some(Self::ClarificationNeeded),
            _ => None,
        }
    }

    /// Every classifiable type, in a fixed order used by deterministic passes.
    pub fn all() -> &'static [IntentType] {
        &[
            Self::Schedule,
            Self::Search,
            Self::Action,
            Self::Query,
            Self::Planning,
            Self::Unknown,
            Self::ClarificationNeeded,
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConstraintType {
    Temporal,
    Location,
    Budget,
    Participant,
    Quality,
    Scope,
}

impl ConstraintType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "TEMPORAL",
            Self::Location => "LOCATION",
            Self::Budget => "BUDGET",
            Self::Participant => "PARTICIPANT",
            Self::Quality => "QUALITY",
            Self::Scope => "SCOPE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TEMPORAL" => Some(Self::Temporal),
            "LOCATION" => Some(Self::Location),
            "BUDGET" => Some(Self::Budget),
            "PARTICIPANT" => Some(Self::Participant),
            "QUALITY" => Some(Self::Quality),
            "SCOPE" => Some(Self::Scope),
            _ => None,
        }
    }
}

/// A provable/unproven condition attached to an intent. An unknown inbound
/// constraint type is nulled by the normalizer and can never be `proven`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    #[serde(rename = "type")]
    pub constraint_type: Option<ConstraintType>,
    pub value: Value,
    pub proven: bool,
    pub validated_by: Option<String>,
}

impl Constraint {
    pub fn proven_of_type(&self, wanted: ConstraintType) -> bool {
        self.proven && self.constraint_type == Some(wanted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityLevel {
    Economy,
    Balanced,
    Premium,
}

/// Safe-by-default request preferences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub urgency: UrgencyLevel,
    pub quality: QualityLevel,
    pub exclusions: Vec<String>,
}

impl Default for Preferences {
    fn default() -> Self {
        Self { urgency: UrgencyLevel::Medium, quality: QualityLevel::Balanced, exclusions: Vec::new() }
    }
}

/// Confidence score with the method and weightings that produced it.
/// `score` is always within [0, 1], rounded to exactly four decimals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confidence {
    pub score: f64,
    pub method: String,
    pub weightings: BTreeMap<String, f64>,
}

impl Confidence {
    pub fn zero() -> Self {
        Self { score: 0.0, method: "default".to_owned(), weightings: BTreeMap::new() }
    }

    pub fn is_valid(&self) -> bool {
        self.score.is_finite() && (0.0..=1.0).contains(&self.score) && !self.method.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Temporal {
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub validity_duration_ms: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    pub input_source: String,
    pub raw_text: String,
    pub context: BTreeMap<String, String>,
    pub generation_metadata: BTreeMap<String, String>,
}

impl Default for Trace {
    fn default() -> Self {
        Self {
            input_source: "unknown".to_owned(),
            raw_text: String::new(),
            context: BTreeMap::new(),
            generation_metadata: BTreeMap::new(),
        }
    }
}

/// An interpretation the classifier considered and turned down. A normalized
/// intent always carries at least one of these.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedInterpretation {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub reason: String,
    pub confidence: f64,
}

impl RejectedInterpretation {
    pub fn is_valid(&self) -> bool {
        self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
            && !self.reason.is_empty()
    }

    /// The synthetic entry appended when normalization leaves the list empty.
    pub fn synthetic() -> Self {
        Self {
            intent_type: IntentType::Unknown,
            reason: "no alternative interpretation recorded".to_owned(),
            confidence: 0.05,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ambiguity {
    pub field: String,
    pub candidates: Vec<String>,
    pub note: Option<String>,
}

/// Immutable canonical representation of a parsed request. Only the
/// normalizer produces these; untrusted input arrives as [`RawIntent`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: String,
    pub version: u32,
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub primary_goal: String,
    pub explicit_constraints: Vec<Constraint>,
    pub preferences: Preferences,
    pub confidence: Confidence,
    pub temporal: Temporal,
    pub trace: Trace,
    pub rejected_interpretations: Vec<RejectedInterpretation>,
    pub ambiguities: Vec<Ambiguity>,
}

/// Loosely-typed intent as received from an external generator or a stored
/// snapshot. Field-for-field identical raw intents normalize identically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawIntent {
    pub id: Option<String>,
    pub version: Option<u32>,
    #[serde(rename = "type")]
    pub intent_type: Option<String>,
    pub primary_goal: Option<String>,
    pub explicit_constraints: Vec<RawConstraint>,
    pub preferences: Option<Value>,
    pub confidence: Option<Value>,
    pub temporal: Option<Temporal>,
    pub trace: Option<RawTrace>,
    pub rejected_interpretations: Vec<Value>,
    pub ambiguities: Vec<Ambiguity>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConstraint {
    #[serde(rename = "type")]
    pub constraint_type: Option<String>,
    pub value: Value,
    pub proven: Option<bool>,
    pub validated_by: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawTrace {
    pub input_source: Option<String>,
    pub raw_text: Option<String>,
    pub context: BTreeMap<String, String>,
    pub generation_metadata: BTreeMap<String, String>,
}

impl From<Intent> for RawIntent {
    fn from(intent: Intent) -> Self {
        Self {
            id: Some(intent.id),
            version: Some(intent.version),
            intent_type: Some(intent.intent_type.as_str().to_owned()),
            primary_goal: Some(intent.primary_goal),
            explicit_constraints: intent
                .explicit_constraints
                .into_iter()
                .map(|constraint| RawConstraint {
                    constraint_type: constraint
                        .constraint_type
                        .map(|kind| kind.as_str().to_owned()),
                    value: constraint.value,
                    proven: Some(constraint.proven),
                    validated_by: constraint.validated_by,
                })
                .collect(),
            preferences: serde_json::to_value(&intent.preferences).ok(),
            confidence: serde_json::to_value(&intent.confidence).ok(),
            temporal: Some(intent.temporal),
            trace: Some(RawTrace {
                input_source: Some(intent.trace.input_source),
                raw_text: Some(intent.trace.raw_text),
                context: intent.trace.context,
                generation_metadata: intent.trace.generation_metadata,
            }),
            rejected_interpretations: intent
                .rejected_interpretations
                .iter()
                .filter_map(|entry| serde_json::to_value(entry).ok())
                .collect(),
            ambiguities: intent.ambiguities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_type_round_trips_through_strings() {
        for intent_type in IntentType::all() {
            assert_eq!(IntentType::parse(intent_type.as_str()), Some(*intent_type));
        }
        assert_eq!(IntentType::parse("clarification_needed"), Some(IntentType::ClarificationNeeded));
        assert_eq!(IntentType::parse("RESERVATION"), None);
    }

    #[test]
    fn constraint_type_parse_is_case_insensitive() {
        assert_eq!(ConstraintType::parse(" temporal "), Some(ConstraintType::Temporal));
        assert_eq!(ConstraintType::parse("vibe"), None);
    }

    #[test]
    fn intent_serializes_with_original_wire_names() {
        let intent = Intent {
            id: "intent-1".to_owned(),
            version: 1,
            intent_type: IntentType::Schedule,
            primary_goal: "schedule meeting".to_owned(),
            explicit_constraints: vec![Constraint {
                constraint_type: Some(ConstraintType::Temporal),
                value: Value::String("tomorrow".to_owned()),
                proven: true,
                validated_by: Some("keyword_heuristic".to_owned()),
            }],
            preferences: Preferences::default(),
            confidence: Confidence::zero(),
            temporal: Temporal::default(),
            trace: Trace::default(),
            rejected_interpretations: vec![RejectedInterpretation::synthetic()],
            ambiguities: Vec::new(),
        };

        let json = serde_json::to_value(&intent).expect("serialize");
        assert_eq!(json["type"], "SCHEDULE");
        assert_eq!(json["primaryGoal"], "schedule meeting");
        assert_eq!(json["explicitConstraints"][0]["type"], "TEMPORAL");
        assert_eq!(json["rejectedInterpretations"][0]["type"], "UNKNOWN");
    }

    #[test]
    fn raw_intent_tolerates_missing_fields() {
        let raw: RawIntent =
            serde_json::from_str(r#"{"type":"RESTAURANT","primaryGoal":"eat"}"#).expect("parse");
        assert_eq!(raw.intent_type.as_deref(), Some("RESTAURANT"));
        assert!(raw.id.is_none());
        assert!(raw.explicit_constraints.is_empty());
    }
}
