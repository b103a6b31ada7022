//! Retry policy and backoff computation.
//!
//! Delays are computed per retry attempt from the configured strategy,
//! clamped into `[min_delay, max_delay]`, with optional jitter to avoid
//! synchronized retries from many callers.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::config::RetrySettings;

/// Backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Constant delay.
    Fixed,
    /// Delay grows by the base per attempt.
    Linear,
    /// Delay doubles per attempt.
    Exponential,
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(format!("unknown backoff strategy: {}", other)),
        }
    }
}

/// Retry policy: attempt bound, backoff strategy and delay clamps.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Global retry switch.
    pub enabled: bool,

    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// How the delay grows between attempts.
    pub strategy: BackoffStrategy,

    /// Base delay and lower clamp.
    pub min_delay: Duration,

    /// Upper clamp.
    pub max_delay: Duration,

    /// Spread delays by up to 25% to avoid thundering herds.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Build from config settings.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_attempts: settings.max_attempts.max(1),
            strategy: settings.backoff,
            min_delay: Duration::from_millis(settings.min_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms.max(settings.min_delay_ms)),
            jitter: settings.jitter,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            strategy: BackoffStrategy::Fixed,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay to sleep before retry `attempt` (1-based: the delay after
    /// the first failed attempt is `delay_for_attempt(1)`). Clamped into
    /// `[min_delay, max_delay]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.min_delay.as_millis() as f64;
        let attempt = attempt.max(1);

        let raw = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * attempt as f64,
            BackoffStrategy::Exponential => base * 2_f64.powi(attempt as i32 - 1),
        };

        let clamped = raw
            .max(self.min_delay.as_millis() as f64)
            .min(self.max_delay.as_millis() as f64);

        let jittered = if self.jitter {
            // Up to 25% on top, re-clamped to the upper bound.
            (clamped + clamped * 0.25 * jitter_fraction()).min(self.max_delay.as_millis() as f64)
        } else {
            clamped
        };

        Duration::from_millis(jittered as u64)
    }
}

/// Pseudo-random fraction in `[0, 1)` without a rand dependency: an LCG
/// seeded from a counter and the clock.
fn jitter_fraction() -> f64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEED: AtomicU64 = AtomicU64::new(0);

    const A: u64 = 6364136223846793005;
    const C: u64 = 1442695040888963407;

    let counter = SEED.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);

    let mixed = A.wrapping_mul(counter ^ nanos).wrapping_add(C);
    (mixed >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: BackoffStrategy) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_attempts: 5,
            strategy,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(5000),
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_delays_non_decreasing_and_clamped() {
        let policy = policy(BackoffStrategy::Exponential);
        let mut previous = Duration::ZERO;
        for attempt in 1..=10 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= previous, "attempt {} decreased", attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(5000));
            previous = delay;
        }
        // 100, 200, 400, ... capped at 5000.
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_fixed_delay_constant() {
        let policy = policy(BackoffStrategy::Fixed);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(100));
    }

    #[test]
    fn test_linear_delay_grows_by_base() {
        let policy = policy(BackoffStrategy::Linear);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(300));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut policy = policy(BackoffStrategy::Exponential);
        policy.jitter = true;
        for attempt in 1..=10 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "exponential".parse::<BackoffStrategy>().unwrap(),
            BackoffStrategy::Exponential
        );
        assert_eq!("Fixed".parse::<BackoffStrategy>().unwrap(), BackoffStrategy::Fixed);
        assert!("random".parse::<BackoffStrategy>().is_err());
    }

    #[test]
    fn test_settings_clamp_inverted_bounds() {
        let settings = RetrySettings {
            enabled: true,
            max_attempts: 0,
            backoff: BackoffStrategy::Fixed,
            min_delay_ms: 500,
            max_delay_ms: 100,
            jitter: false,
        };
        let policy = RetryPolicy::from_settings(&settings);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_millis(500));
    }
}
