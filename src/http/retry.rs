//! Bounded exponential backoff for calls to download clients and Arr instances.
//!
//! Every outbound request goes through [`RetryPolicy::should_retry`] after a
//! failure. Failures are first classified with [`classify_error`]:
//!
//! - [`FailureType::Transient`] - connection drops, timeouts, 5xx, 408
//! - [`FailureType::Permanent`] - other 4xx, TLS problems, undecodable bodies
//! - [`FailureType::NeedsAuth`] - 401/403; never retried here, the protocol
//!   adapter decides whether a re-login is worth one replay
//! - [`FailureType::RateLimited`] - 429, retried with backoff
//!
//! # Example
//!
//! ```
//! use cleanarr_core::http::{HttpError, RetryDecision, RetryPolicy, classify_error};
//!
//! let policy = RetryPolicy::default();
//! let error = HttpError::status("http://qbit:8080/api/v2/torrents/info", 502, "");
//!
//! match policy.should_retry(classify_error(&error), 1) {
//!     RetryDecision::Retry { delay, attempt } => println!("attempt {attempt} in {delay:?}"),
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use super::HttpError;

/// Default number of attempts, the first call included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Upper bound of the random jitter added to each delay.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// How a failed request should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// May succeed if repeated (timeouts, 5xx, dropped connections).
    Transient,
    /// Repeating the same request cannot help.
    Permanent,
    /// Credentials or session rejected (401/403).
    NeedsAuth,
    /// Remote asked us to slow down (429).
    RateLimited,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then make attempt number `attempt`.
    Retry { delay: Duration, attempt: u32 },
    /// Surface the error to the caller.
    DoNotRetry { reason: String },
}

/// Backoff settings: `delay = min(base * multiplier^(attempt-1), max) + jitter`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is clamped to at least one.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Default backoff with a custom attempt budget.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what to do after attempt number `attempt` (1-indexed) failed.
    #[instrument(level = "trace", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure".to_string(),
                };
            }
            FailureType::NeedsAuth => {
                return RetryDecision::DoNotRetry {
                    reason: "authentication rejected".to_string(),
                };
            }
            FailureType::Transient | FailureType::RateLimited => {}
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "retry budget exhausted");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let exponent = f64::from(attempt.saturating_sub(1));
        let delay_ms = base_ms * f64::from(self.backoff_multiplier).powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_ms as u64) + jitter()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn jitter() -> Duration {
    let max = MAX_JITTER.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

/// Classifies an [`HttpError`] for retry purposes.
#[must_use]
pub fn classify_error(error: &HttpError) -> FailureType {
    match error {
        HttpError::Status { status, .. } => classify_status(*status),
        HttpError::Timeout { .. } => FailureType::Transient,
        HttpError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        HttpError::Build { .. } | HttpError::InvalidUrl { .. } | HttpError::Decode { .. } => {
            FailureType::Permanent
        }
    }
}

/// Status code table shared by every protocol adapter and the Arr client.
#[allow(clippy::match_same_arms)]
#[must_use]
pub fn classify_status(status: u16) -> FailureType {
    match status {
        401 | 403 => FailureType::NeedsAuth,
        408 => FailureType::Transient,
        429 => FailureType::RateLimited,
        400..=499 => FailureType::Permanent,
        500..=599 => FailureType::Transient,
        _ => FailureType::Permanent,
    }
}

fn is_tls_error(error: &reqwest::Error) -> bool {
    let text = error.to_string().to_lowercase();
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|needle| text.contains(needle))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Policy ====================

    #[test]
    fn test_default_policy_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(32));
    }

    #[test]
    fn test_max_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::with_max_attempts(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(5), 2.0);

        let first = policy.calculate_delay(1);
        assert!(first >= Duration::from_secs(1) && first <= Duration::from_millis(1500));

        let third = policy.calculate_delay(3);
        assert!(third >= Duration::from_secs(4) && third <= Duration::from_millis(4500));

        let capped = policy.calculate_delay(8);
        assert!(capped >= Duration::from_secs(5) && capped <= Duration::from_millis(5500));
    }

    #[test]
    fn test_jitter_never_exceeds_bound() {
        for _ in 0..100 {
            assert!(jitter() <= MAX_JITTER);
        }
    }

    // ==================== Decisions ====================

    #[test]
    fn test_auth_failures_are_never_retried() {
        let policy = RetryPolicy::with_max_attempts(10);
        let decision = policy.should_retry(FailureType::NeedsAuth, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { ref reason } if reason.contains("authentication")));
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        let decision = RetryPolicy::default().should_retry(FailureType::Permanent, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_transient_retries_until_budget_exhausted() {
        let policy = RetryPolicy::with_max_attempts(3);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry { attempt: 2, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::RateLimited, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 3),
            RetryDecision::DoNotRetry { ref reason } if reason.contains("exhausted")
        ));
    }

    // ==================== Classification ====================

    #[test]
    fn test_classify_status_table() {
        assert_eq!(classify_status(401), FailureType::NeedsAuth);
        assert_eq!(classify_status(403), FailureType::NeedsAuth);
        assert_eq!(classify_status(404), FailureType::Permanent);
        assert_eq!(classify_status(409), FailureType::Permanent);
        assert_eq!(classify_status(408), FailureType::Transient);
        assert_eq!(classify_status(429), FailureType::RateLimited);
        assert_eq!(classify_status(500), FailureType::Transient);
        assert_eq!(classify_status(503), FailureType::Transient);
        assert_eq!(classify_status(302), FailureType::Permanent);
    }

    #[test]
    fn test_classify_error_variants() {
        assert_eq!(
            classify_error(&HttpError::timeout("http://deluge:8112/json")),
            FailureType::Transient
        );
        assert_eq!(
            classify_error(&HttpError::decode("http://deluge:8112/json", "bad json")),
            FailureType::Permanent
        );
        assert_eq!(
            classify_error(&HttpError::status("http://sonarr:8989/api/v3/queue", 503, "")),
            FailureType::Transient
        );
    }
}
