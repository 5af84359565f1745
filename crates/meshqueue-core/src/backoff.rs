use rand::Rng;
use std::time::Duration;

/// Exponential backoff with a cap and uniform jitter: `min(cap,
/// base * 2^(attempts-1)) + uniform(0, jitter)`. Monotonic non-decreasing in
/// `attempts` before jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(300),
            jitter: Duration::from_millis(500),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempts: i32) -> Duration {
        let attempts = attempts.max(1) as u32;
        let scaled = self
            .base
            .checked_mul(1u32.checked_shl(attempts.saturating_sub(1)).unwrap_or(u32::MAX))
            .unwrap_or(self.cap);
        let bounded = scaled.min(self.cap);

        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };

        bounded + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_before_jitter() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: Duration::ZERO,
        };
        let d1 = policy.delay_for_attempt(1);
        let d2 = policy.delay_for_attempt(2);
        let d3 = policy.delay_for_attempt(3);
        assert!(d1 <= d2);
        assert!(d2 <= d3);
    }

    #[test]
    fn caps_growth() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(10),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[test]
    fn zero_attempts_treated_as_one() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(60),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(0), policy.delay_for_attempt(1));
    }
}
