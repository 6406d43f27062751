use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reliability::{BreakerConfig, RateLimitConfig, RetryPolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub execution: ExecutionConfig,
    pub breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ExecutionConfig {
    pub default_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_backoff_multiplier: u64,
    pub reflection_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub cooldown_ms: i64,
}

#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_ms: i64,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub terminal_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub store_url: Option<String>,
    pub log_level: Option<String>,
    pub default_timeout_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub reflection_enabled: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig {
                default_timeout_ms: 30_000,
                max_attempts: 3,
                retry_base_delay_ms: 1_000,
                retry_backoff_multiplier: 2,
                reflection_enabled: false,
            },
            breaker: BreakerSettings { failure_threshold: 3, cooldown_ms: 30_000 },
            rate_limit: RateLimitSettings { max_requests: 60, window_ms: 60_000 },
            store: StoreConfig {
                url: "sqlite://waypoint.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                terminal_ttl_secs: 86_400,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("waypoint.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.execution.max_attempts,
            base_delay_ms: self.execution.retry_base_delay_ms,
            backoff_multiplier: self.execution.retry_backoff_multiplier,
        }
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            cooldown_ms: self.breaker.cooldown_ms,
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit.max_requests,
            window_ms: self.rate_limit.window_ms,
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(execution) = patch.execution {
            if let Some(default_timeout_ms) = execution.default_timeout_ms {
                self.execution.default_timeout_ms = default_timeout_ms;
            }
            if let Some(max_attempts) = execution.max_attempts {
                self.execution.max_attempts = max_attempts;
            }
            if let Some(retry_base_delay_ms) = execution.retry_base_delay_ms {
                self.execution.retry_base_delay_ms = retry_base_delay_ms;
            }
            if let Some(retry_backoff_multiplier) = execution.retry_backoff_multiplier {
                self.execution.retry_backoff_multiplier = retry_backoff_multiplier;
            }
            if let Some(reflection_enabled) = execution.reflection_enabled {
                self.execution.reflection_enabled = reflection_enabled;
            }
        }

        if let Some(breaker) = patch.breaker {
            if let Some(failure_threshold) = breaker.failure_threshold {
                self.breaker.failure_threshold = failure_threshold;
            }
            if let Some(cooldown_ms) = breaker.cooldown_ms {
                self.breaker.cooldown_ms = cooldown_ms;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(max_requests) = rate_limit.max_requests {
                self.rate_limit.max_requests = max_requests;
            }
            if let Some(window_ms) = rate_limit.window_ms {
                self.rate_limit.window_ms = window_ms;
            }
        }

        if let Some(store) = patch.store {
            if let Some(url) = store.url {
                self.store.url = url;
            }
            if let Some(max_connections) = store.max_connections {
                self.store.max_connections = max_connections;
            }
            if let Some(timeout_secs) = store.timeout_secs {
                self.store.timeout_secs = timeout_secs;
            }
            if let Some(terminal_ttl_secs) = store.terminal_ttl_secs {
                self.store.terminal_ttl_secs = terminal_ttl_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("WAYPOINT_EXECUTION_DEFAULT_TIMEOUT_MS") {
            self.execution.default_timeout_ms =
                parse_u64("WAYPOINT_EXECUTION_DEFAULT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_EXECUTION_MAX_ATTEMPTS") {
            self.execution.max_attempts = parse_u32("WAYPOINT_EXECUTION_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_EXECUTION_RETRY_BASE_DELAY_MS") {
            self.execution.retry_base_delay_ms =
                parse_u64("WAYPOINT_EXECUTION_RETRY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_EXECUTION_RETRY_BACKOFF_MULTIPLIER") {
            self.execution.retry_backoff_multiplier =
                parse_u64("WAYPOINT_EXECUTION_RETRY_BACKOFF_MULTIPLIER", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_EXECUTION_REFLECTION_ENABLED") {
            self.execution.reflection_enabled =
                parse_bool("WAYPOINT_EXECUTION_REFLECTION_ENABLED", &value)?;
        }

        if let Some(value) = read_env("WAYPOINT_BREAKER_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold =
                parse_u32("WAYPOINT_BREAKER_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_BREAKER_COOLDOWN_MS") {
            self.breaker.cooldown_ms = parse_i64("WAYPOINT_BREAKER_COOLDOWN_MS", &value)?;
        }

        if let Some(value) = read_env("WAYPOINT_RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = parse_u32("WAYPOINT_RATE_LIMIT_MAX_REQUESTS", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = parse_i64("WAYPOINT_RATE_LIMIT_WINDOW_MS", &value)?;
        }

        if let Some(value) = read_env("WAYPOINT_STORE_URL") {
            self.store.url = value;
        }
        if let Some(value) = read_env("WAYPOINT_STORE_MAX_CONNECTIONS") {
            self.store.max_connections = parse_u32("WAYPOINT_STORE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_STORE_TIMEOUT_SECS") {
            self.store.timeout_secs = parse_u64("WAYPOINT_STORE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("WAYPOINT_STORE_TERMINAL_TTL_SECS") {
            self.store.terminal_ttl_secs = parse_u64("WAYPOINT_STORE_TERMINAL_TTL_SECS", &value)?;
        }

        let log_level =
            read_env("WAYPOINT_LOGGING_LEVEL").or_else(|| read_env("WAYPOINT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("WAYPOINT_LOGGING_FORMAT").or_else(|| read_env("WAYPOINT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(store_url) = overrides.store_url {
            self.store.url = store_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(default_timeout_ms) = overrides.default_timeout_ms {
            self.execution.default_timeout_ms = default_timeout_ms;
        }
        if let Some(max_attempts) = overrides.max_attempts {
            self.execution.max_attempts = max_attempts;
        }
        if let Some(reflection_enabled) = overrides.reflection_enabled {
            self.execution.reflection_enabled = reflection_enabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_execution(&self.execution)?;
        validate_breaker(&self.breaker)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_store(&self.store)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("waypoint.toml"), PathBuf::from("config/waypoint.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_execution(execution: &ExecutionConfig) -> Result<(), ConfigError> {
    if execution.default_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "execution.default_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if execution.max_attempts == 0 || execution.max_attempts > 10 {
        return Err(ConfigError::Validation(
            "execution.max_attempts must be in range 1..=10".to_string(),
        ));
    }

    if execution.retry_backoff_multiplier == 0 {
        return Err(ConfigError::Validation(
            "execution.retry_backoff_multiplier must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_breaker(breaker: &BreakerSettings) -> Result<(), ConfigError> {
    if breaker.failure_threshold == 0 {
        return Err(ConfigError::Validation(
            "breaker.failure_threshold must be greater than zero".to_string(),
        ));
    }

    if breaker.cooldown_ms <= 0 {
        return Err(ConfigError::Validation(
            "breaker.cooldown_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitSettings) -> Result<(), ConfigError> {
    if rate_limit.max_requests == 0 {
        return Err(ConfigError::Validation(
            "rate_limit.max_requests must be greater than zero".to_string(),
        ));
    }

    if rate_limit.window_ms <= 0 {
        return Err(ConfigError::Validation(
            "rate_limit.window_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    let url = store.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "store.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if store.max_connections == 0 {
        return Err(ConfigError::Validation(
            "store.max_connections must be greater than zero".to_string(),
        ));
    }

    if store.timeout_secs == 0 || store.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "store.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    execution: Option<ExecutionPatch>,
    breaker: Option<BreakerPatch>,
    rate_limit: Option<RateLimitPatch>,
    store: Option<StorePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutionPatch {
    default_timeout_ms: Option<u64>,
    max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    retry_backoff_multiplier: Option<u64>,
    reflection_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct BreakerPatch {
    failure_threshold: Option<u32>,
    cooldown_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    max_requests: Option<u32>,
    window_ms: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    terminal_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_WAYPOINT_STORE_URL", "sqlite://interpolated.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("waypoint.toml");
            fs::write(
                &path,
                r#"
[store]
url = "${TEST_WAYPOINT_STORE_URL}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.store.url == "sqlite://interpolated.db",
                "store url should be loaded from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_WAYPOINT_STORE_URL"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("WAYPOINT_LOG_LEVEL", "warn");
        env::set_var("WAYPOINT_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["WAYPOINT_LOG_LEVEL", "WAYPOINT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("WAYPOINT_EXECUTION_MAX_ATTEMPTS", "5");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("waypoint.toml");
            fs::write(
                &path,
                r#"
[execution]
max_attempts = 4

[store]
url = "sqlite://from-file.db"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    store_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.store.url == "sqlite://from-override.db",
                "override store url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.execution.max_attempts == 5,
                "env max attempts should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["WAYPOINT_EXECUTION_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("WAYPOINT_STORE_URL", "postgres://not-sqlite");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("store.url")
            );
            ensure(has_message, "validation failure should mention store.url")
        })();

        clear_vars(&["WAYPOINT_STORE_URL"]);
        result
    }

    #[test]
    fn defaults_match_the_reliability_primitives() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::default();
        let policy = config.retry_policy();
        let breaker = config.breaker_config();

        ensure(policy.max_attempts == 3, "default retry budget should be three attempts")?;
        ensure(breaker.failure_threshold == 3, "default breaker threshold should be three")?;
        ensure(breaker.cooldown_ms == 30_000, "default breaker cooldown should be 30s")?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )?;
        Ok(())
    }
}
