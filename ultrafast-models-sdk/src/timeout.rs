//! # Timeout Hierarchy
//!
//! Derives the per-attempt deadline a Coordinator attempt must respect:
//! `min(provider_timeout, remaining_gateway_time)`, clamped by a per-model
//! override when one is configured (spec §4.6). Connection/idle timeouts are
//! a separate, shorter budget the adapter applies internally and are out of
//! scope here.

use std::time::{Duration, Instant};

/// Gateway-level and per-provider timeout defaults plus optional per-model
/// overrides, the inputs to [`derive_attempt_budget`].
#[derive(Debug, Clone)]
pub struct TimeoutPolicy {
    pub gateway_deadline: Duration,
    pub provider_timeout: Duration,
    pub model_overrides: std::collections::HashMap<String, Duration>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            gateway_deadline: Duration::from_secs(120),
            provider_timeout: Duration::from_secs(30),
            model_overrides: std::collections::HashMap::new(),
        }
    }
}

impl TimeoutPolicy {
    pub fn with_model_override(mut self, model: impl Into<String>, timeout: Duration) -> Self {
        self.model_overrides.insert(model.into(), timeout);
        self
    }

    fn provider_budget_for(&self, model: &str) -> Duration {
        self.model_overrides
            .get(model)
            .copied()
            .unwrap_or(self.provider_timeout)
    }
}

/// Derive the budget one provider attempt gets, given the time remaining
/// until `gateway_deadline_at`. `None` means the budget is exhausted — the
/// Coordinator must refuse to begin the attempt (spec §4.6).
pub fn derive_attempt_budget(
    policy: &TimeoutPolicy,
    model: &str,
    gateway_deadline_at: Instant,
    now: Instant,
) -> Option<Duration> {
    let remaining = gateway_deadline_at.saturating_duration_since(now);
    if remaining.is_zero() {
        return None;
    }
    let provider_budget = policy.provider_budget_for(model);
    Some(remaining.min(provider_budget))
}

/// A single request's absolute gateway deadline, computed once at admission.
#[derive(Debug, Clone, Copy)]
pub struct GatewayDeadline {
    at: Instant,
}

impl GatewayDeadline {
    pub fn from_now(policy: &TimeoutPolicy) -> Self {
        Self {
            at: Instant::now() + policy.gateway_deadline,
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: instant }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    pub fn attempt_budget(&self, policy: &TimeoutPolicy, model: &str) -> Option<Duration> {
        derive_attempt_budget(policy, model, self.at, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_min_of_provider_and_remaining() {
        let policy = TimeoutPolicy {
            gateway_deadline: Duration::from_secs(120),
            provider_timeout: Duration::from_secs(30),
            model_overrides: Default::default(),
        };
        let now = Instant::now();
        let deadline = now + Duration::from_secs(10);
        let budget = derive_attempt_budget(&policy, "gpt-4", deadline, now).unwrap();
        assert_eq!(budget, Duration::from_secs(10));

        let deadline = now + Duration::from_secs(90);
        let budget = derive_attempt_budget(&policy, "gpt-4", deadline, now).unwrap();
        assert_eq!(budget, Duration::from_secs(30));
    }

    #[test]
    fn model_override_clamps_provider_budget() {
        let policy = TimeoutPolicy::default().with_model_override("slow-model", Duration::from_secs(5));
        let now = Instant::now();
        let deadline = now + Duration::from_secs(120);
        let budget = derive_attempt_budget(&policy, "slow-model", deadline, now).unwrap();
        assert_eq!(budget, Duration::from_secs(5));
    }

    #[test]
    fn expired_deadline_yields_no_budget() {
        let policy = TimeoutPolicy::default();
        let now = Instant::now();
        let deadline = now - Duration::from_millis(1);
        assert!(derive_attempt_budget(&policy, "gpt-4", deadline, now).is_none());
    }

    #[test]
    fn gateway_deadline_reports_expired() {
        let deadline = GatewayDeadline::at(Instant::now() - Duration::from_millis(5));
        assert!(deadline.expired());
    }
}
