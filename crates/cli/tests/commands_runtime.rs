use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use chrono::{TimeZone, Utc};
use serde_json::Value;

use waypoint_cli::commands::{classify, doctor, replay, verify};
use waypoint_core::domain::intent::IntentType;
use waypoint_core::pipeline::run_pipeline;

const FIXED_TIME: &str = "2026-03-14T09:26:53Z";

#[test]
fn classify_is_byte_identical_across_invocations() {
    with_env(&[], || {
        let first = classify::run("schedule a meeting tomorrow at 3pm", "SCHEDULE", Some(FIXED_TIME));
        let second =
            classify::run("schedule a meeting tomorrow at 3pm", "SCHEDULE", Some(FIXED_TIME));

        assert_eq!(first.exit_code, 0, "expected successful classify");
        assert_eq!(first.output, second.output);

        let payload = parse_payload(&first.output);
        assert_eq!(payload["intentType"], "SCHEDULE");
        assert!(payload["signature"].as_str().is_some_and(|s| !s.is_empty()));
    });
}

#[test]
fn classify_rejects_unknown_intent_type() {
    with_env(&[], || {
        let result = classify::run("do something", "NONSENSE", Some(FIXED_TIME));
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "classify");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "invalid_intent_type");
    });
}

#[test]
fn classify_rejects_malformed_reference_time() {
    with_env(&[], || {
        let result = classify::run("find coffee", "SEARCH", Some("yesterday-ish"));
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_reference_time");
    });
}

#[test]
fn verify_reports_a_single_signature() {
    with_env(&[], || {
        let result = verify::run("find coffee near me", "SEARCH", 50, Some(FIXED_TIME));
        assert_eq!(result.exit_code, 0, "expected deterministic pipeline");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "verify");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn verify_rejects_zero_runs() {
    with_env(&[], || {
        let result = verify::run("find coffee near me", "SEARCH", 0, Some(FIXED_TIME));
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_runs");
    });
}

#[test]
fn replay_of_a_fresh_snapshot_succeeds() {
    with_env(&[], || {
        let reference_time = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let state =
            run_pipeline("schedule a meeting tomorrow at 3pm", IntentType::Schedule, reference_time);
        let path = snapshot_path("fresh");
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let result = replay::run(&path, false);
        fs::remove_file(&path).ok();

        assert_eq!(result.exit_code, 0, "expected successful replay: {}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["wasSuccessful"], true);
    });
}

#[test]
fn replay_flags_a_tampered_signature() {
    with_env(&[], || {
        let reference_time = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let mut state =
            run_pipeline("schedule a meeting tomorrow at 3pm", IntentType::Schedule, reference_time);
        state.signature.push_str("tampered");
        let path = snapshot_path("tampered");
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let result = replay::run(&path, false);
        fs::remove_file(&path).ok();

        assert_eq!(result.exit_code, 4, "expected replay divergence: {}", result.output);
        let payload = parse_payload(&result.output);
        assert_eq!(payload["wasSuccessful"], false);
        let stages: Vec<&str> = payload["errors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|error| error["stage"].as_str())
            .collect();
        assert!(stages.contains(&"signature_verification"));
    });
}

#[test]
fn replay_fails_cleanly_on_a_missing_file() {
    with_env(&[], || {
        let result = replay::run(&PathBuf::from("/nonexistent/snapshot.json"), false);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "state_file_unreadable");
    });
}

#[test]
fn doctor_passes_against_an_in_memory_store() {
    with_env(&[("WAYPOINT_STORE_URL", "sqlite::memory:")], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "expected passing doctor report: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let names: Vec<&str> = payload["checks"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(names, vec!["config_validation", "store_connectivity", "pipeline_determinism"]);
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn snapshot_path(tag: &str) -> PathBuf {
    env::temp_dir().join(format!("waypoint-replay-{tag}-{}.json", std::process::id()))
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "WAYPOINT_EXECUTION_DEFAULT_TIMEOUT_MS",
        "WAYPOINT_EXECUTION_MAX_ATTEMPTS",
        "WAYPOINT_EXECUTION_RETRY_BASE_DELAY_MS",
        "WAYPOINT_EXECUTION_RETRY_BACKOFF_MULTIPLIER",
        "WAYPOINT_EXECUTION_REFLECTION_ENABLED",
        "WAYPOINT_BREAKER_FAILURE_THRESHOLD",
        "WAYPOINT_BREAKER_COOLDOWN_MS",
        "WAYPOINT_RATE_LIMIT_MAX_REQUESTS",
        "WAYPOINT_RATE_LIMIT_WINDOW_MS",
        "WAYPOINT_STORE_URL",
        "WAYPOINT_STORE_MAX_CONNECTIONS",
        "WAYPOINT_STORE_TIMEOUT_SECS",
        "WAYPOINT_STORE_TERMINAL_TTL_SECS",
        "WAYPOINT_LOGGING_LEVEL",
        "WAYPOINT_LOGGING_FORMAT",
        "WAYPOINT_LOG_LEVEL",
        "WAYPOINT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
