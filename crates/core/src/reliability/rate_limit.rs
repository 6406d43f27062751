//! Fixed-window rate limiting keyed by caller identity and endpoint.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { max_requests: 60, window_ms: 60_000 }
    }
}

#[derive(Debug)]
struct Window {
    started_at: DateTime<Utc>,
    count: u32,
}

/// Counts requests per `caller:endpoint` key within a fixed window. The
/// window resets as a whole when it elapses; there is no sliding behavior.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, windows: Mutex::new(HashMap::new()) }
    }

    /// Admits or rejects one request. Admitted requests count against the
    /// current window.
    pub fn check(&self, caller: &str, endpoint: &str, now: DateTime<Utc>) -> bool {
        let key = format!("{caller}:{endpoint}");
        let mut windows =
            self.windows.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = windows
            .entry(key)
            .or_insert(Window { started_at: now, count: 0 });

        if now - window.started_at >= Duration::milliseconds(self.config.window_ms) {
            window.started_at = now;
            window.count = 0;
        }

        if window.count < self.config.max_requests {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
