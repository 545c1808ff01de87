//! # Retry Backoff & Jitter
//!
//! The delay a [`crate::coordinator::Coordinator`] sleeps between retry
//! attempts: exponential growth clamped to a ceiling, then randomized so
//! concurrent callers retrying the same outage don't all wake up together.

use std::time::Duration;

use rand::Rng;

/// How a computed backoff delay is randomized before sleeping.
#[derive(Debug, Clone, Copy)]
pub enum Jitter {
    /// No randomization; sleep exactly the computed delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay/2, delay]`.
    Equal,
    /// AWS-style: uniform in `[base, min(max, prev*3))`, `prev` seeded to
    /// `base` on the first retry. The default (spec §4.10): spreads a
    /// thundering herd across a growing window rather than a fixed one.
    Decorrelated,
}

/// Exponential backoff policy: `delay = min(base * multiplier^attempt, max)`,
/// then jittered per [`Jitter`].
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter: Jitter,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Jitter::Decorrelated,
        }
    }
}

/// Carries the decorrelated jitter's running `prev` value across retries
/// within one request; every other jitter kind is stateless.
#[derive(Debug, Clone, Copy)]
pub struct BackoffState {
    prev: Duration,
}

impl BackoffState {
    pub fn new(policy: &BackoffPolicy) -> Self {
        Self { prev: policy.base }
    }

    /// Compute the delay for `attempt` (0-indexed) and advance internal
    /// state for the next call.
    pub fn next_delay(&mut self, policy: &BackoffPolicy, attempt: u32) -> Duration {
        let exponential = policy.base.mul_f64(policy.multiplier.powi(attempt as i32));
        let capped = exponential.min(policy.max);

        let delay = match policy.jitter {
            Jitter::None => capped,
            Jitter::Full => jitter_uniform(Duration::ZERO, capped),
            Jitter::Equal => jitter_uniform(capped / 2, capped),
            Jitter::Decorrelated => {
                let upper = self.prev.saturating_mul(3).min(policy.max);
                let sampled = if policy.base >= upper {
                    policy.base
                } else {
                    jitter_uniform(policy.base, upper)
                };
                self.prev = sampled;
                sampled
            }
        };
        delay
    }
}

fn jitter_uniform(low: Duration, high: Duration) -> Duration {
    let low_millis = low.as_millis() as u64;
    let high_millis = high.as_millis() as u64;
    if high_millis <= low_millis {
        return low;
    }
    Duration::from_millis(rand::thread_rng().gen_range(low_millis..=high_millis))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_jitter_is_exact_exponential() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: Jitter::None,
        };
        let mut state = BackoffState::new(&policy);
        assert_eq!(state.next_delay(&policy, 0), Duration::from_millis(100));
        assert_eq!(state.next_delay(&policy, 1), Duration::from_millis(200));
        assert_eq!(state.next_delay(&policy, 2), Duration::from_millis(400));
    }

    #[test]
    fn exponential_growth_clamps_at_max() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: Jitter::None,
        };
        let mut state = BackoffState::new(&policy);
        assert_eq!(state.next_delay(&policy, 10), Duration::from_millis(500));
    }

    #[test]
    fn decorrelated_jitter_seeds_from_base_and_stays_in_bounds() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: Jitter::Decorrelated,
        };
        let mut state = BackoffState::new(&policy);
        for attempt in 0..10 {
            let delay = state.next_delay(&policy, attempt);
            assert!(delay >= policy.base);
            assert!(delay <= policy.max);
        }
    }

    #[test]
    fn full_jitter_stays_within_zero_and_cap() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: Jitter::Full,
        };
        let mut state = BackoffState::new(&policy);
        for attempt in 0..5 {
            let delay = state.next_delay(&policy, attempt);
            assert!(delay <= policy.max);
        }
    }
}
