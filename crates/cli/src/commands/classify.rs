use chrono::{DateTime, Utc};

use waypoint_core::domain::intent::IntentType;
use waypoint_core::pipeline::run_pipeline;

use super::CommandResult;

pub fn run(text: &str, intent_type: &str, at: Option<&str>) -> CommandResult {
    let Some(intent_type) = IntentType::parse(intent_type) else {
        return CommandResult::failure(
            "classify",
            "invalid_intent_type",
            format!("unknown intent type `{intent_type}`"),
            2,
        );
    };

    let reference_time = match parse_reference_time(at) {
        Ok(time) => time,
        Err(message) => {
            return CommandResult::failure("classify", "invalid_reference_time", message, 2);
        }
    };

    let state = run_pipeline(text, intent_type, reference_time);
    match serde_json::to_string_pretty(&state) {
        Ok(output) => CommandResult { exit_code: 0, output },
        Err(error) => CommandResult::failure("classify", "serialization", error.to_string(), 3),
    }
}

pub(crate) fn parse_reference_time(at: Option<&str>) -> Result<DateTime<Utc>, String> {
    match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|parsed| parsed.with_timezone(&Utc))
            .map_err(|error| format!("`{raw}` is not a valid RFC 3339 timestamp: {error}")),
        None => Ok(Utc::now()),
    }
}
