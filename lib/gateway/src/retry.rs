//! Retry and backoff policy.
//!
//! Only [`CallErrorKind::Transient`] failures retry in place; everything
//! else either escalates to the next candidate or aborts the chain.

use brightpath_provider::CallErrorKind;
use rand::Rng;
use std::time::Duration;

/// Per-candidate retry tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts per candidate, including the first.
    pub max_attempts_per_provider: u32,
    /// Backoff before the second attempt.
    pub base_backoff: Duration,
    /// Upper bound on the exponential backoff.
    pub max_backoff: Duration,
    /// Jitter fraction applied to each backoff (0.0 disables jitter).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts_per_provider: 2,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Whether a failure of this kind should retry the same candidate.
    #[must_use]
    pub fn retries_in_place(&self, kind: CallErrorKind, attempts_made: u32) -> bool {
        kind == CallErrorKind::Transient && attempts_made < self.max_attempts_per_provider
    }

    /// Backoff before the next attempt, given how many attempts were
    /// already made on this candidate. Exponential with jitter.
    #[must_use]
    pub fn backoff_after(&self, attempts_made: u32) -> Duration {
        let doublings = attempts_made.saturating_sub(1).min(16);
        let base_ms = u64::try_from(self.base_backoff.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_backoff.as_millis()).unwrap_or(u64::MAX);
        let capped = base_ms.saturating_mul(1 << doublings).min(max_ms);

        if self.jitter <= 0.0 {
            return Duration::from_millis(capped);
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = (capped as f64 * (1.0 + spread)).max(0.0);
        Duration::from_millis(jittered as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy_without_jitter() -> RetryPolicy {
        RetryPolicy {
            max_attempts_per_provider: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: 0.0,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy_without_jitter();
        assert_eq!(policy.backoff_after(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_after(2), Duration::from_millis(200));
        // 400ms is capped at 350ms.
        assert_eq!(policy.backoff_after(3), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let policy = RetryPolicy {
            jitter: 0.2,
            ..policy_without_jitter()
        };
        for _ in 0..50 {
            let backoff = policy.backoff_after(1);
            assert!(backoff >= Duration::from_millis(80));
            assert!(backoff <= Duration::from_millis(120));
        }
    }

    #[test]
    fn only_transient_retries_in_place() {
        let policy = policy_without_jitter();
        assert!(policy.retries_in_place(CallErrorKind::Transient, 1));
        assert!(policy.retries_in_place(CallErrorKind::Transient, 2));
        assert!(!policy.retries_in_place(CallErrorKind::Transient, 3));
        assert!(!policy.retries_in_place(CallErrorKind::ProviderUnavailable, 1));
        assert!(!policy.retries_in_place(CallErrorKind::InvalidResponse, 1));
        assert!(!policy.retries_in_place(CallErrorKind::Permanent, 1));
    }
}
