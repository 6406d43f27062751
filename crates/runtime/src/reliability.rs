//! Asynchronous composition of the reliability primitives around one tool
//! call: rate-limit check, breaker gate, timed attempt, retry on transient
//! failure, and outcome recording into the breaker.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::time::{sleep, timeout, Duration};
use tracing::debug;

use waypoint_core::errors::FaultKind;
use waypoint_core::reliability::{classify_status, BreakerRegistry, RateLimiter, RetryPolicy};

use crate::tools::Tool;

#[derive(Clone, Debug)]
pub struct CallOutcome {
    pub output: Value,
    pub latency_ms: u64,
    pub attempts: u32,
}

#[derive(Clone, Debug)]
pub struct CallFailure {
    pub kind: FaultKind,
    pub message: String,
    pub attempts: u32,
}

#[derive(Clone)]
pub struct ReliabilityLayer {
    breakers: Arc<BreakerRegistry>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl ReliabilityLayer {
    pub fn new(breakers: Arc<BreakerRegistry>, limiter: Arc<RateLimiter>, retry: RetryPolicy) -> Self {
        Self { breakers, limiter, retry }
    }

    /// Runs one logical tool call under the full reliability stack. The
    /// breaker is gated per attempt, so a breaker opened by a concurrent
    /// caller stops the retry loop immediately.
    pub async fn call(
        &self,
        caller: &str,
        resource: &str,
        tool: &dyn Tool,
        input: Value,
        timeout_ms: u64,
    ) -> Result<CallOutcome, CallFailure> {
        if !self.limiter.check(caller, resource, Utc::now()) {
            return Err(CallFailure {
                kind: FaultKind::ResourceUnavailable,
                message: format!("rate limit exceeded for {caller} on {resource}"),
                attempts: 0,
            });
        }

        let breaker = self.breakers.breaker(resource);
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if !breaker.check(Utc::now()) {
                return Err(CallFailure {
                    kind: FaultKind::ResourceUnavailable,
                    message: format!("circuit breaker open for {resource}"),
                    attempts: attempt,
                });
            }

            let result = timeout(Duration::from_millis(timeout_ms), tool.execute(input.clone())).await;
            let (kind, message) = match result {
                Ok(Ok(output)) => {
                    breaker.record_success();
                    return Ok(CallOutcome {
                        output,
                        latency_ms: started.elapsed().as_millis() as u64,
                        attempts: attempt + 1,
                    });
                }
                Ok(Err(failure)) => (classify_status(failure.status), failure.message),
                Err(_elapsed) => {
                    (FaultKind::Transient, format!("attempt timed out after {timeout_ms}ms"))
                }
            };

            breaker.record_failure(Utc::now());

            if self.retry.should_retry(attempt, kind) {
                let delay = self.retry.delay_ms(attempt);
                debug!(resource, attempt, delay_ms = delay, "retrying transient failure");
                sleep(Duration::from_millis(delay)).await;
                attempt += 1;
                continue;
            }

            return Err(CallFailure { kind, message, attempts: attempt + 1 });
        }
    }
}
