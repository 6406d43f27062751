use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use waypoint_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "execution.default_timeout_ms",
        &config.execution.default_timeout_ms.to_string(),
        source("execution.default_timeout_ms", "WAYPOINT_EXECUTION_DEFAULT_TIMEOUT_MS"),
    ));
    lines.push(render_line(
        "execution.max_attempts",
        &config.execution.max_attempts.to_string(),
        source("execution.max_attempts", "WAYPOINT_EXECUTION_MAX_ATTEMPTS"),
    ));
    lines.push(render_line(
        "execution.retry_base_delay_ms",
        &config.execution.retry_base_delay_ms.to_string(),
        source("execution.retry_base_delay_ms", "WAYPOINT_EXECUTION_RETRY_BASE_DELAY_MS"),
    ));
    lines.push(render_line(
        "execution.retry_backoff_multiplier",
        &config.execution.retry_backoff_multiplier.to_string(),
        source("execution.retry_backoff_multiplier", "WAYPOINT_EXECUTION_RETRY_BACKOFF_MULTIPLIER"),
    ));
    lines.push(render_line(
        "execution.reflection_enabled",
        &config.execution.reflection_enabled.to_string(),
        source("execution.reflection_enabled", "WAYPOINT_EXECUTION_REFLECTION_ENABLED"),
    ));

    lines.push(render_line(
        "breaker.failure_threshold",
        &config.breaker.failure_threshold.to_string(),
        source("breaker.failure_threshold", "WAYPOINT_BREAKER_FAILURE_THRESHOLD"),
    ));
    lines.push(render_line(
        "breaker.cooldown_ms",
        &config.breaker.cooldown_ms.to_string(),
        source("breaker.cooldown_ms", "WAYPOINT_BREAKER_COOLDOWN_MS"),
    ));

    lines.push(render_line(
        "rate_limit.max_requests",
        &config.rate_limit.max_requests.to_string(),
        source("rate_limit.max_requests", "WAYPOINT_RATE_LIMIT_MAX_REQUESTS"),
    ));
    lines.push(render_line(
        "rate_limit.window_ms",
        &config.rate_limit.window_ms.to_string(),
        source("rate_limit.window_ms", "WAYPOINT_RATE_LIMIT_WINDOW_MS"),
    ));

    lines.push(render_line(
        "store.url",
        &config.store.url,
        source("store.url", "WAYPOINT_STORE_URL"),
    ));
    lines.push(render_line(
        "store.max_connections",
        &config.store.max_connections.to_string(),
        source("store.max_connections", "WAYPOINT_STORE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "store.timeout_secs",
        &config.store.timeout_secs.to_string(),
        source("store.timeout_secs", "WAYPOINT_STORE_TIMEOUT_SECS"),
    ));
    lines.push(render_line(
        "store.terminal_ttl_secs",
        &config.store.terminal_ttl_secs.to_string(),
        source("store.terminal_ttl_secs", "WAYPOINT_STORE_TERMINAL_TTL_SECS"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "WAYPOINT_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "WAYPOINT_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("waypoint.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/waypoint.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
