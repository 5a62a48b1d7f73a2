//! Exponential backoff with jitter.
//!
//! [`RetryPolicy`] is a pure helper shared by the offline queue and remote
//! calls. It holds policy parameters only.
//!
//! Delay for attempt `n` (1-based):
//!
//! ```text
//! ceiling(n) = min(max_delay, base_delay * 2^(n-1))
//! next_delay(n) = ceiling(n) + jitter,  jitter uniformly in [0, ceiling(n))
//! ```
//!
//! So `ceiling(n) <= next_delay(n) < 2 * ceiling(n)` whenever the ceiling is
//! nonzero. Two calls with the same attempt differ only inside that band.

use std::time::Duration;

/// Backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay ceiling of the first retry.
    pub base_delay: Duration,
    /// Upper bound of the ceiling (jitter comes on top).
    pub max_delay: Duration,
    /// Attempts after which an operation is abandoned.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Create a policy.
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// Deterministic part of the delay for `attempt` (1-based).
    ///
    /// Attempt 0 has no delay.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay for `attempt` with jitter derived from `entropy`.
    ///
    /// The jitter is `entropy mod ceiling` nanoseconds, so any entropy value
    /// stays inside `[ceiling, 2 * ceiling)`.
    pub fn delay_with_entropy(&self, attempt: u32, entropy: u64) -> Duration {
        let ceiling = self.ceiling(attempt);
        let span = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        if span == 0 {
            return ceiling;
        }
        ceiling + Duration::from_nanos(entropy % span)
    }

    /// Delay before retrying `attempt`, with random jitter.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.delay_with_entropy(attempt, random_entropy())
    }

    /// Delay before retrying after a failure, honouring a remote hint.
    pub fn delay_after(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        hint.unwrap_or_else(|| self.next_delay(attempt))
    }

    /// Whether an operation that has failed `attempts` times is abandoned.
    pub fn should_abandon(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

/// Random 64-bit value for jitter. Falls back to no jitter if the OS RNG
/// is unavailable.
fn random_entropy() -> u64 {
    let mut bytes = [0u8; 8];
    match getrandom::getrandom(&mut bytes) {
        Ok(()) => u64::from_le_bytes(bytes),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(100), Duration::from_secs(2), 5)
    }

    #[test]
    fn ceiling_doubles_per_attempt() {
        let p = policy();
        assert_eq!(p.ceiling(1), Duration::from_millis(100));
        assert_eq!(p.ceiling(2), Duration::from_millis(200));
        assert_eq!(p.ceiling(3), Duration::from_millis(400));
        assert_eq!(p.ceiling(4), Duration::from_millis(800));
    }

    #[test]
    fn ceiling_is_capped() {
        let p = policy();
        assert_eq!(p.ceiling(6), Duration::from_secs(2));
        assert_eq!(p.ceiling(40), Duration::from_secs(2));
        assert_eq!(p.ceiling(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn attempt_zero_has_no_delay() {
        assert_eq!(policy().next_delay(0), Duration::ZERO);
    }

    #[test]
    fn entropy_stays_inside_jitter_band() {
        let p = policy();
        for entropy in [0, 1, 99_999_999, 100_000_000, u64::MAX] {
            let d = p.delay_with_entropy(1, entropy);
            assert!(d >= Duration::from_millis(100));
            assert!(d < Duration::from_millis(200), "{d:?} escaped band");
        }
    }

    #[test]
    fn random_delay_respects_documented_bound() {
        let p = policy();
        for attempt in 1..=8 {
            let ceiling = p.ceiling(attempt);
            for _ in 0..50 {
                let d = p.next_delay(attempt);
                assert!(d >= ceiling, "attempt {attempt}: {d:?} < {ceiling:?}");
                assert!(d < ceiling * 2, "attempt {attempt}: {d:?} >= 2x{ceiling:?}");
            }
        }
    }

    #[test]
    fn jitter_creates_variance() {
        let p = policy();
        let delays: Vec<Duration> = (0..20).map(|_| p.next_delay(3)).collect();
        let min = delays.iter().min().unwrap();
        let max = delays.iter().max().unwrap();
        // 20 samples over a 400ms band: identical values are vanishingly unlikely
        assert!(max > min, "expected jitter variance, got {min:?}..{max:?}");
    }

    #[test]
    fn hint_overrides_policy() {
        let p = policy();
        assert_eq!(
            p.delay_after(1, Some(Duration::from_secs(9))),
            Duration::from_secs(9)
        );
        let d = p.delay_after(1, None);
        assert!(d >= Duration::from_millis(100) && d < Duration::from_millis(200));
    }

    #[test]
    fn abandon_at_ceiling() {
        let p = policy();
        assert!(!p.should_abandon(4));
        assert!(p.should_abandon(5));
        assert!(p.should_abandon(6));
    }

    #[test]
    fn default_policy() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.ceiling(1), Duration::from_millis(500));
        assert_eq!(p.ceiling(20), Duration::from_secs(30));
    }
}
