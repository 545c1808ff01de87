//! # Retry Budget & Bulkhead
//!
//! Two independent admission controls the Coordinator layers around every
//! provider attempt (spec §4.4-4.5):
//!
//! - [`RetryBudget`] — a lazily-refilling token bucket that governs *retries
//!   only*, never the initial attempt, to keep a correlated outage from
//!   turning into a retry storm.
//! - [`Bulkhead`] — a per-provider semaphore bounding concurrent in-flight
//!   calls, so one slow provider cannot starve every worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;

use crate::error::CoreError;

/// Token-bucket retry permit source. `permits` is stored as a fixed-point
/// value (millitoken) so refill can use integer atomics without a lock.
pub struct RetryBudget {
    max: f64,
    refill_per_sec: f64,
    permits_milli: AtomicU64,
    last_refill: std::sync::Mutex<Instant>,
}

impl RetryBudget {
    pub fn new(max: f64, refill_per_sec: f64) -> Self {
        Self {
            max,
            refill_per_sec,
            permits_milli: AtomicU64::new((max * 1000.0) as u64),
            last_refill: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn refill(&self) {
        let mut last = match self.last_refill.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(*last).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        *last = now;
        drop(last);

        let added_milli = (elapsed * self.refill_per_sec * 1000.0) as u64;
        if added_milli == 0 {
            return;
        }
        let max_milli = (self.max * 1000.0) as u64;
        self.permits_milli
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + added_milli).min(max_milli))
            })
            .ok();
    }

    /// Draw one permit for a retry (never the initial attempt). Returns
    /// `true` if a permit was available and has been consumed.
    pub fn try_acquire(&self) -> bool {
        self.refill();
        self.permits_milli
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                if current >= 1000 {
                    Some(current - 1000)
                } else {
                    None
                }
            })
            .is_ok()
    }

    /// Return a permit after an eventual success following one or more
    /// retries (spec §4.4: "on final success after retry, one permit is
    /// returned").
    pub fn release(&self) {
        let max_milli = (self.max * 1000.0) as u64;
        self.permits_milli
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some((current + 1000).min(max_milli))
            })
            .ok();
    }

    pub fn available_permits(&self) -> f64 {
        self.refill();
        self.permits_milli.load(Ordering::Acquire) as f64 / 1000.0
    }
}

/// RAII permit released back to the bulkhead's semaphore on drop.
pub struct BulkheadTicket {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Per-provider concurrency limiter: bounded semaphore plus a bounded-wait
/// acquisition (spec §4.5). Cheap to clone; the semaphore is `Arc`-shared.
#[derive(Clone)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_wait: Duration,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize, max_wait: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_wait,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Acquire a permit, waiting up to `max_wait`. On timeout returns a
    /// retryable `CoreError::BulkheadRejection`.
    pub async fn acquire(&self, provider_id: &str) -> Result<BulkheadTicket, CoreError> {
        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(BulkheadTicket { _permit: permit }),
            Ok(Err(_)) => Err(CoreError::Internal {
                message: format!("bulkhead semaphore for {provider_id} closed"),
            }),
            Err(_) => Err(CoreError::BulkheadRejection {
                provider_id: provider_id.to_string(),
                in_flight: self.in_flight(),
                max_concurrent: self.max_concurrent,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_budget_draws_and_caps_at_max() {
        let budget = RetryBudget::new(2.0, 1.0);
        assert!(budget.try_acquire());
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
    }

    #[test]
    fn retry_budget_release_restores_a_permit() {
        let budget = RetryBudget::new(1.0, 0.0);
        assert!(budget.try_acquire());
        assert!(!budget.try_acquire());
        budget.release();
        assert!(budget.try_acquire());
    }

    #[tokio::test]
    async fn bulkhead_admits_within_limit() {
        let bulkhead = Bulkhead::new(2, Duration::from_millis(50));
        let a = bulkhead.acquire("p1").await.unwrap();
        let b = bulkhead.acquire("p1").await.unwrap();
        assert_eq!(bulkhead.in_flight(), 2);
        drop(a);
        drop(b);
    }

    #[tokio::test]
    async fn bulkhead_rejects_past_max_wait() {
        let bulkhead = Bulkhead::new(1, Duration::from_millis(20));
        let _held = bulkhead.acquire("p1").await.unwrap();
        let result = bulkhead.acquire("p1").await;
        assert!(matches!(result, Err(CoreError::BulkheadRejection { .. })));
    }

    #[tokio::test]
    async fn bulkhead_releases_permit_on_drop() {
        let bulkhead = Bulkhead::new(1, Duration::from_millis(50));
        {
            let _held = bulkhead.acquire("p1").await.unwrap();
            assert_eq!(bulkhead.in_flight(), 1);
        }
        assert_eq!(bulkhead.in_flight(), 0);
        assert!(bulkhead.acquire("p1").await.is_ok());
    }
}
