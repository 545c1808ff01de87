//! # Circuit Breaker Module
//!
//! Per-provider failure detector sitting between the [Resilience
//! Coordinator](crate::coordinator) and each provider adapter. Three states —
//! `Closed`, `Open`, `HalfOpen` — transition on atomic compare-and-swap, so
//! admission checks never take a lock.
//!
//! ## Circuit Breaker States
//!
//! ### Closed State (Normal Operation)
//! All requests are admitted. A sliding window of `N` buckets and a
//! consecutive-failure counter both feed the open decision: the circuit opens
//! when **either** consecutive failures reach `failure_threshold` **or** the
//! window has seen at least `min_requests` with a failure rate at or above
//! `failure_rate_threshold`.
//!
//! ### Open State (Failure Detected)
//! Requests are rejected immediately with a retryable `CircuitOpen` error
//! carrying the remaining `retry_after`. Once `recovery_timeout` has elapsed
//! since the circuit opened, the next admitting caller wins a CAS race to
//! transition to `HalfOpen`.
//!
//! ### Half-Open State (Testing Recovery)
//! Up to `half_open_max_requests` concurrent probes are admitted. A single
//! failure reopens the circuit; `success_threshold` consecutive successes
//! closes it. A probe that never resolves within `half_open_timeout` reopens
//! the circuit defensively.
//!
//! Every admitted call is issued a [`CircuitBreakerGuard`]. Dropping the guard
//! without calling `record_success`/`record_failure` (a panic, a cancelled
//! task) counts as a failure — this closes the "panic leak" hole where an
//! aborted request would otherwise never update breaker accounting.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Circuit breaker operational states, as observed from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit outright.
    pub failure_threshold: u32,
    /// Minimum window sample size before the failure-rate trigger applies.
    pub min_requests: u32,
    /// Window failure rate (0.0-1.0) that opens the circuit once `min_requests` is met.
    pub failure_rate_threshold: f64,
    /// Number of sliding-window buckets (spec default 10).
    pub window_buckets: usize,
    /// Total span covered by the sliding window; each bucket covers `sampling_window / window_buckets`.
    #[serde(with = "crate::common::duration_serde")]
    pub sampling_window: Duration,
    /// Time to wait in `Open` before trying a half-open probe.
    #[serde(with = "crate::common::duration_serde")]
    pub recovery_timeout: Duration,
    /// Concurrent probes admitted while `HalfOpen`.
    pub half_open_max_requests: u32,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
    /// If a half-open probe never resolves within this, the circuit reopens.
    #[serde(with = "crate::common::duration_serde")]
    pub half_open_timeout: Duration,
    /// Whether a timeout outcome counts as a breaker failure.
    pub count_timeouts_as_failures: bool,
    /// Whether a 5xx outcome counts as a breaker failure.
    pub count_5xx_as_failures: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            min_requests: 10,
            failure_rate_threshold: 0.5,
            window_buckets: 10,
            sampling_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(60),
            half_open_max_requests: 3,
            success_threshold: 3,
            half_open_timeout: Duration::from_secs(30),
            count_timeouts_as_failures: true,
            count_5xx_as_failures: true,
        }
    }
}

struct Bucket {
    successes: AtomicU32,
    failures: AtomicU32,
}

impl Bucket {
    fn new() -> Self {
        Self {
            successes: AtomicU32::new(0),
            failures: AtomicU32::new(0),
        }
    }

    fn reset(&self) {
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

/// `N` contiguous time buckets with per-bucket atomic counters and lazy
/// rotation on write. Cross-thread visibility is eventually consistent by
/// design: the breaker only needs short windows with hysteresis, not strict
/// linearizability.
struct SlidingWindow {
    buckets: Vec<Bucket>,
    bucket_span_millis: u64,
    current_index: AtomicUsize,
    bucket_started_at_millis: AtomicU64,
    start: Instant,
}

impl SlidingWindow {
    fn new(buckets: usize, span: Duration) -> Self {
        let buckets = buckets.max(1);
        Self {
            buckets: (0..buckets).map(|_| Bucket::new()).collect(),
            bucket_span_millis: (span.as_millis() as u64 / buckets as u64).max(1),
            current_index: AtomicUsize::new(0),
            bucket_started_at_millis: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn rotate_if_needed(&self, now_millis: u64) {
        loop {
            let started = self.bucket_started_at_millis.load(Ordering::Acquire);
            if now_millis.saturating_sub(started) < self.bucket_span_millis {
                return;
            }
            let next = (self.current_index.load(Ordering::Relaxed) + 1) % self.buckets.len();
            if self
                .bucket_started_at_millis
                .compare_exchange(started, now_millis, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.buckets[next].reset();
                self.current_index.store(next, Ordering::Release);
                return;
            }
        }
    }

    fn record(&self, success: bool) {
        let now = self.now_millis();
        self.rotate_if_needed(now);
        let idx = self.current_index.load(Ordering::Acquire);
        if success {
            self.buckets[idx].successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.buckets[idx].failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Total requests and failures currently visible across all buckets.
    fn snapshot(&self) -> (u32, u32) {
        self.buckets.iter().fold((0, 0), |(reqs, fails), bucket| {
            let s = bucket.successes.load(Ordering::Relaxed);
            let f = bucket.failures.load(Ordering::Relaxed);
            (reqs + s + f, fails + f)
        })
    }

    fn reset(&self) {
        for bucket in &self.buckets {
            bucket.reset();
        }
    }
}

struct Inner {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    half_open_successes: AtomicU32,
    half_open_in_flight: AtomicU32,
    opened_at_millis: AtomicU64,
    window: SlidingWindow,
    start: Instant,
}

impl Inner {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Per-provider circuit breaker. Cheap to clone: internal state is `Arc`-shared.
#[derive(Clone)]
pub struct CircuitBreaker {
    provider_id: String,
    config: CircuitBreakerConfig,
    inner: Arc<Inner>,
}

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    Open,
    HalfOpenSaturated,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let start = Instant::now();
        let window = SlidingWindow::new(config.window_buckets, config.sampling_window);
        Self {
            provider_id: provider_id.into(),
            config,
            inner: Arc::new(Inner {
                state: AtomicU8::new(STATE_CLOSED),
                consecutive_failures: AtomicU32::new(0),
                half_open_successes: AtomicU32::new(0),
                half_open_in_flight: AtomicU32::new(0),
                opened_at_millis: AtomicU64::new(0),
                window,
                start,
            }),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// The configuration this breaker was constructed with, so callers can
    /// decide whether a given outcome kind (timeout, 5xx) should count
    /// against it before calling `record_failure`.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Attempt to admit one request. Returns a guard the caller must resolve
    /// with `record_success`, `record_failure`, or `record_ignored`; dropping
    /// it unresolved records a failure.
    pub fn try_admit(&self) -> Result<CircuitBreakerGuard, AdmissionError> {
        loop {
            let state = self.inner.state.load(Ordering::Acquire);
            match state {
                STATE_CLOSED => break,
                STATE_OPEN => {
                    let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
                    let now = self.inner.now_millis();
                    let elapsed = now.saturating_sub(opened_at);
                    if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                        match self.inner.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!(provider = %self.provider_id, "circuit breaker -> half-open");
                                self.inner.half_open_successes.store(0, Ordering::Release);
                                self.inner.half_open_in_flight.store(0, Ordering::Release);
                                self.inner
                                    .opened_at_millis
                                    .store(now, Ordering::Release);
                                continue;
                            }
                            Err(_) => continue,
                        }
                    } else {
                        return Err(AdmissionError::Open);
                    }
                }
                STATE_HALF_OPEN => {
                    let half_open_started = self.inner.opened_at_millis.load(Ordering::Acquire);
                    let now = self.inner.now_millis();
                    if now.saturating_sub(half_open_started)
                        >= self.config.half_open_timeout.as_millis() as u64
                    {
                        // Probe window elapsed without resolution; reopen defensively.
                        if self
                            .inner
                            .state
                            .compare_exchange(
                                STATE_HALF_OPEN,
                                STATE_OPEN,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            self.inner.opened_at_millis.store(now, Ordering::Release);
                            tracing::warn!(provider = %self.provider_id, "half-open probe window expired -> open");
                        }
                        continue;
                    }

                    let in_flight = self.inner.half_open_in_flight.fetch_add(1, Ordering::AcqRel);
                    if in_flight >= self.config.half_open_max_requests {
                        self.inner.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
                        return Err(AdmissionError::HalfOpenSaturated);
                    }
                    return Ok(CircuitBreakerGuard::new(self.clone(), true));
                }
                _ => unreachable!("invalid circuit breaker state"),
            }
        }

        Ok(CircuitBreakerGuard::new(self.clone(), false))
    }

    pub fn state(&self) -> CircuitState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!(),
        }
    }

    /// Force the circuit back to `Closed` and clear all counters, for the
    /// admin plane's `reset_breaker(id)` (spec §6). Idempotent.
    pub fn reset(&self) {
        self.inner.state.store(STATE_CLOSED, Ordering::Release);
        self.inner.consecutive_failures.store(0, Ordering::Release);
        self.inner.half_open_successes.store(0, Ordering::Release);
        self.inner.half_open_in_flight.store(0, Ordering::Release);
        self.inner.opened_at_millis.store(0, Ordering::Release);
        self.inner.window.reset();
    }

    pub fn retry_after(&self) -> Duration {
        let opened_at = self.inner.opened_at_millis.load(Ordering::Acquire);
        let now = self.inner.now_millis();
        let elapsed = now.saturating_sub(opened_at);
        Duration::from_millis(
            (self.config.recovery_timeout.as_millis() as u64).saturating_sub(elapsed),
        )
    }

    /// Release a half-open probe slot without recording a success or
    /// failure. Used for outcomes the breaker is configured to exclude from
    /// its accounting entirely (e.g. 429 by default), so they neither open
    /// nor help close the circuit.
    fn release_ignored(&self, was_half_open: bool) {
        if was_half_open {
            self.inner.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn record_outcome(&self, was_half_open: bool, success: bool) {
        self.inner.window.record(success);

        if was_half_open {
            self.inner.half_open_in_flight.fetch_sub(1, Ordering::AcqRel);
        }

        if success {
            self.inner.consecutive_failures.store(0, Ordering::Release);

            if was_half_open {
                let successes = self.inner.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold
                    && self
                        .inner
                        .state
                        .compare_exchange(
                            STATE_HALF_OPEN,
                            STATE_CLOSED,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.inner.consecutive_failures.store(0, Ordering::Release);
                    self.inner.window.reset();
                    tracing::info!(provider = %self.provider_id, "circuit breaker -> closed");
                }
            }
            return;
        }

        if was_half_open {
            if self
                .inner
                .state
                .compare_exchange(
                    STATE_HALF_OPEN,
                    STATE_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.inner
                    .opened_at_millis
                    .store(self.inner.now_millis(), Ordering::Release);
                tracing::warn!(provider = %self.provider_id, "half-open probe failed -> open");
            }
            return;
        }

        let consecutive = self.inner.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let (window_requests, window_failures) = self.inner.window.snapshot();
        let window_rate = if window_requests > 0 {
            window_failures as f64 / window_requests as f64
        } else {
            0.0
        };

        let should_open = consecutive >= self.config.failure_threshold
            || (window_requests >= self.config.min_requests
                && window_rate >= self.config.failure_rate_threshold);

        if should_open
            && self
                .inner
                .state
                .compare_exchange(STATE_CLOSED, STATE_OPEN, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.inner
                .opened_at_millis
                .store(self.inner.now_millis(), Ordering::Release);
            tracing::error!(
                provider = %self.provider_id,
                consecutive,
                window_rate,
                "circuit breaker -> open"
            );
        }
    }
}

/// RAII admission ticket. Must be resolved with `record_success` or
/// `record_failure`; an unresolved drop counts as a failure.
pub struct CircuitBreakerGuard {
    breaker: CircuitBreaker,
    was_half_open: bool,
    resolved: std::cell::Cell<bool>,
}

impl CircuitBreakerGuard {
    fn new(breaker: CircuitBreaker, was_half_open: bool) -> Self {
        Self {
            breaker,
            was_half_open,
            resolved: std::cell::Cell::new(false),
        }
    }

    pub fn record_success(self) {
        self.resolved.set(true);
        self.breaker.record_outcome(self.was_half_open, true);
    }

    pub fn record_failure(self) {
        self.resolved.set(true);
        self.breaker.record_outcome(self.was_half_open, false);
    }

    /// Resolve the guard without recording a success or failure — for
    /// outcomes the breaker is configured to exclude from its accounting
    /// (spec: 429 doesn't count by default; timeouts/5xx count iff
    /// configured).
    pub fn record_ignored(self) {
        self.resolved.set(true);
        self.breaker.release_ignored(self.was_half_open);
    }
}

impl Drop for CircuitBreakerGuard {
    fn drop(&mut self) {
        if !self.resolved.get() {
            self.resolved.set(true);
            self.breaker.record_outcome(self.was_half_open, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, recovery_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            min_requests: u32::MAX,
            failure_rate_threshold: 1.1,
            window_buckets: 10,
            sampling_window: Duration::from_secs(60),
            recovery_timeout,
            half_open_max_requests: 1,
            success_threshold: 1,
            half_open_timeout: Duration::from_secs(30),
            count_timeouts_as_failures: true,
            count_5xx_as_failures: true,
        }
    }

    #[test]
    fn starts_closed_and_admits() {
        let breaker = CircuitBreaker::new("p1", config(3, Duration::from_secs(1)));
        assert_eq!(breaker.state(), CircuitState::Closed);
        let guard = breaker.try_admit().unwrap();
        guard.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("p1", config(2, Duration::from_secs(10)));
        for _ in 0..2 {
            let guard = breaker.try_admit().unwrap();
            guard.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_admit().is_err());
    }

    #[test]
    fn unresolved_guard_counts_as_failure() {
        let breaker = CircuitBreaker::new("p1", config(1, Duration::from_secs(10)));
        {
            let _guard = breaker.try_admit().unwrap();
            // dropped without recording
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_success_closes_circuit() {
        let breaker = CircuitBreaker::new("p1", config(1, Duration::from_millis(10)));
        let guard = breaker.try_admit().unwrap();
        guard.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));

        let guard = breaker.try_admit().expect("half-open probe admitted");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        guard.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("p1", config(1, Duration::from_millis(10)));
        breaker.try_admit().unwrap().record_failure();
        std::thread::sleep(Duration::from_millis(20));

        let guard = breaker.try_admit().expect("half-open probe admitted");
        guard.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_limits_concurrent_probes() {
        let breaker = CircuitBreaker::new("p1", config(1, Duration::from_millis(10)));
        breaker.try_admit().unwrap().record_failure();
        std::thread::sleep(Duration::from_millis(20));

        let first = breaker.try_admit();
        assert!(first.is_ok());
        let second = breaker.try_admit();
        assert!(second.is_err());
    }

    #[test]
    fn ignored_outcome_does_not_open_circuit() {
        let breaker = CircuitBreaker::new("p1", config(2, Duration::from_secs(10)));
        for _ in 0..5 {
            let guard = breaker.try_admit().unwrap();
            guard.record_ignored();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_admit().is_ok());
    }

    #[test]
    fn window_failure_rate_opens_without_consecutive_threshold() {
        let mut cfg = config(u32::MAX, Duration::from_secs(10));
        cfg.min_requests = 4;
        cfg.failure_rate_threshold = 0.5;
        let breaker = CircuitBreaker::new("p1", cfg);

        breaker.try_admit().unwrap().record_success();
        breaker.try_admit().unwrap().record_failure();
        breaker.try_admit().unwrap().record_success();
        breaker.try_admit().unwrap().record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
