use std::fs;
use std::path::Path;

use waypoint_core::domain::execution::PipelineState;
use waypoint_core::normalizer::NormalizationMode;
use waypoint_core::signature::{replay, ReplayConfig};

use super::CommandResult;

pub fn run(state_file: &Path, strict: bool) -> CommandResult {
    let raw = match fs::read_to_string(state_file) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "state_file_unreadable",
                format!("could not read `{}`: {error}", state_file.display()),
                2,
            );
        }
    };

    let state: PipelineState = match serde_json::from_str(&raw) {
        Ok(state) => state,
        Err(error) => {
            return CommandResult::failure(
                "replay",
                "state_file_invalid",
                format!("could not parse `{}`: {error}", state_file.display()),
                2,
            );
        }
    };

    let mode = if strict { NormalizationMode::Strict } else { NormalizationMode::Lenient };
    let outcome = replay(&state.raw_text, &state, &ReplayConfig { mode });

    let output = match serde_json::to_string_pretty(&outcome) {
        Ok(output) => output,
        Err(error) => {
            return CommandResult::failure("replay", "serialization", error.to_string(), 3);
        }
    };

    let exit_code = if outcome.was_successful { 0 } else { 4 };
    CommandResult { exit_code, output }
}
