//! Retry policy: attempt budget, exponential backoff, and fault
//! classification. The timed execution itself lives in the runtime crate.

use crate::errors::FaultKind;

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 1_000, backoff_multiplier: 2 }
    }
}

impl RetryPolicy {
    /// Backoff before retrying after the given zero-based attempt:
    /// `base * multiplier^attempt`, saturating.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let factor = self.backoff_multiplier.saturating_pow(attempt);
        self.base_delay_ms.saturating_mul(factor)
    }

    /// Whether another attempt may follow the given zero-based attempt.
    /// Only transient faults are ever retried.
    pub fn should_retry(&self, attempt: u32, kind: FaultKind) -> bool {
        kind.is_retryable() && attempt + 1 < self.max_attempts
    }
}

/// Maps a tool failure's HTTP-like status to the fault taxonomy. A missing
/// status means the call never got a response and is treated as transient.
pub fn classify_status(status: Option<u16>) -> FaultKind {
    match status {
        None => FaultKind::Transient,
        Some(408) | Some(429) => FaultKind::Transient,
        Some(status) if (500..=599).contains(&status) => FaultKind::Transient,
        Some(status) if (400..=499).contains(&status) => FaultKind::Validation,
        Some(_) => FaultKind::Transient,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_ms(0), 1_000);
        assert_eq!(policy.delay_ms(1), 2_000);
        assert_eq!(policy.delay_ms(2), 4_000);
    }

    #[test]
    fn only_transient_faults_are_retried() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0, FaultKind::Transient));
        assert!(policy.should_retry(1, FaultKind::Transient));
        assert!(!policy.should_retry(2, FaultKind::Transient));
        assert!(!policy.should_retry(0, FaultKind::Validation));
        assert!(!policy.should_retry(0, FaultKind::ResourceUnavailable));
    }

    #[test]
    fn status_classification_matches_the_taxonomy() {
        assert_eq!(classify_status(None), FaultKind::Transient);
        assert_eq!(classify_status(Some(429)), FaultKind::Transient);
        assert_eq!(classify_status(Some(503)), FaultKind::Transient);
        assert_eq!(classify_status(Some(400)), FaultKind::Validation);
        assert_eq!(classify_status(Some(404)), FaultKind::Validation);
        assert_eq!(classify_status(Some(422)), FaultKind::Validation);
    }
}
