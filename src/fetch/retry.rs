use rand::Rng;
use std::time::Duration;

/// Retry and backoff settings for page requests.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per page for transient errors (first try included).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
    /// Adds up to ±25% jitter to each backoff delay.
    pub jitter: bool,
    /// Wait applied to a 429 response that carries no `Retry-After` header.
    pub rate_limit_fallback: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
            rate_limit_fallback: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failed_attempts` failures (>= 1).
    pub fn backoff(&self, failed_attempts: u32) -> Duration {
        if failed_attempts == 0 {
            return Duration::ZERO;
        }

        let exponent = (failed_attempts - 1).min(32) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        if capped <= 0.0 {
            return Duration::ZERO;
        }

        let delay = if self.jitter {
            let spread = capped * 0.25;
            capped + rand::thread_rng().gen_range(-spread..=spread)
        } else {
            capped
        };

        Duration::from_secs_f64(delay.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = no_jitter();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = no_jitter();
        assert_eq!(policy.backoff(20), Duration::from_secs(60));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_zero_attempts_has_no_delay() {
        assert_eq!(RetryPolicy::default().backoff(0), Duration::ZERO);
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::default();
        for _ in 0..100 {
            let d = policy.backoff(2).as_secs_f64();
            assert!((1.5..=2.5).contains(&d), "delay {} out of range", d);
        }
    }
}
