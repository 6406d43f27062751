use waypoint_core::domain::intent::IntentType;
use waypoint_core::signature::determinism_probe;

use super::classify::parse_reference_time;
use super::CommandResult;

pub fn run(text: &str, intent_type: &str, runs: usize, at: Option<&str>) -> CommandResult {
    let Some(intent_type) = IntentType::parse(intent_type) else {
        return CommandResult::failure(
            "verify",
            "invalid_intent_type",
            format!("unknown intent type `{intent_type}`"),
            2,
        );
    };

    if runs == 0 {
        return CommandResult::failure("verify", "invalid_runs", "runs must be at least 1", 2);
    }

    let reference_time = match parse_reference_time(at) {
        Ok(time) => time,
        Err(message) => {
            return CommandResult::failure("verify", "invalid_reference_time", message, 2);
        }
    };

    let signatures = determinism_probe(text, intent_type, runs, reference_time);
    if signatures.len() == 1 {
        CommandResult::success("verify", format!("{runs} runs produced a single signature"))
    } else {
        CommandResult::failure(
            "verify",
            "determinism_violation",
            format!("{} distinct signatures observed across {runs} runs", signatures.len()),
            5,
        )
    }
}
