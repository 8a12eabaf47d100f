//! Bounded exponential backoff shared by the HTTP clients.

use reqwest::StatusCode;
use std::time::Duration;

/// Retry budget and delay curve for transient failures.
///
/// Call sites own their retry loops and consult `delay` between attempts, so
/// the policy stays a plain value with no hidden state.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Attempts allowed per operation, counting the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling applied after doubling.
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Build a policy from millisecond settings.
    pub fn new(max_attempts: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(initial_backoff_ms),
            max_delay: Duration::from_millis(max_backoff_ms),
        }
    }

    /// Delay to wait after the zero-based `attempt` has failed.
    ///
    /// Doubles per attempt with the exponent clamped so the multiplication
    /// cannot overflow, then caps at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(10));
        let millis = u64::try_from(self.initial_delay.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(factor);
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Statuses worth retrying: throttling, request timeout, and server-side errors.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        let policy = BackoffPolicy::new(5, 500, 8_000);
        assert_eq!(policy.delay(0), Duration::from_millis(500));
        assert_eq!(policy.delay(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay(4), Duration::from_millis(8_000));
        assert_eq!(policy.delay(5), Duration::from_millis(8_000));
        assert_eq!(policy.delay(60), Duration::from_millis(8_000));
    }

    #[test]
    fn transient_statuses_cover_throttling_and_server_errors() {
        assert!(is_transient_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(StatusCode::NOT_FOUND));
    }
}
