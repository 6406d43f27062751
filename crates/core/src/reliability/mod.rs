//! Reliability primitives shared by every outbound tool call.
//!
//! Composition order for a call: rate-limit check, breaker gate, timed
//! attempt, retry on transient failure, then record the outcome into the
//! breaker. The asynchronous composition lives in the runtime crate; these
//! primitives are synchronous and clock-injected so they test in isolation.

mod breaker;
mod rate_limit;
mod retry;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{classify_status, RetryPolicy};
