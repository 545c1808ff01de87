//! # Resilience Coordinator
//!
//! Wraps one end-to-end request with the per-attempt resilience stack:
//! bulkhead admission, circuit breaker admission, a derived attempt
//! timeout, the adapter call itself, and outcome recording, looping with
//! backoff on a retryable failure until the gateway deadline or retry
//! budget is exhausted (spec §4.10).

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::backoff::{BackoffPolicy, BackoffState};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerGuard};
use crate::error::{CoreError, ProviderError};
use crate::registry::ProviderCandidate;
use crate::resilience::{Bulkhead, RetryBudget};
use crate::router::{RouteContext, Router};
use crate::timeout::TimeoutPolicy;

/// Resolve a breaker admission guard for a failed attempt, classifying the
/// outcome per the breaker's own config rather than treating every error as
/// a failure. A 429 never counts; timeouts and 5xx count only if the
/// breaker is configured to count them (spec §4.3).
fn record_breaker_outcome(breaker: &CircuitBreaker, guard: CircuitBreakerGuard, err: &CoreError) {
    let counts_as_failure = match err {
        CoreError::RateLimited { .. } => false,
        CoreError::ProviderTransient { .. } => breaker.config().count_5xx_as_failures,
        CoreError::ProviderTimeout { .. } => breaker.config().count_timeouts_as_failures,
        _ => true,
    };
    if counts_as_failure {
        guard.record_failure();
    } else {
        guard.record_ignored();
    }
}

/// Resource-pool sizing the Coordinator uses when it lazily creates a
/// provider's bulkhead/retry-budget on first use.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub timeout_policy: TimeoutPolicy,
    pub backoff_policy: BackoffPolicy,
    pub max_retries: u32,
    pub bulkhead_max_concurrent: usize,
    pub bulkhead_max_wait: Duration,
    pub retry_budget_max: f64,
    pub retry_budget_refill_per_sec: f64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout_policy: TimeoutPolicy::default(),
            backoff_policy: BackoffPolicy::default(),
            max_retries: 3,
            bulkhead_max_concurrent: 100,
            bulkhead_max_wait: Duration::from_secs(5),
            retry_budget_max: 10.0,
            retry_budget_refill_per_sec: 1.0,
        }
    }
}

/// Wraps a [`Router`] with the retry/bulkhead/breaker/timeout stack (spec
/// §4.10). One Coordinator typically serves an entire process; its
/// per-provider bulkheads and retry budgets are created lazily and persist
/// across requests.
pub struct Coordinator {
    router: Router,
    config: CoordinatorConfig,
    bulkheads: DashMap<String, Bulkhead>,
    retry_budgets: DashMap<String, RetryBudget>,
}

impl Coordinator {
    pub fn new(router: Router, config: CoordinatorConfig) -> Self {
        Self {
            router,
            config,
            bulkheads: DashMap::new(),
            retry_budgets: DashMap::new(),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Current in-flight count for a provider's bulkhead, if one has been
    /// created yet (spec §4.11 gauge: "bulkhead utilization").
    pub fn bulkhead_in_flight(&self, provider_id: &str) -> Option<usize> {
        self.bulkheads.get(provider_id).map(|b| b.in_flight())
    }

    /// Current retry-budget permits available for a provider, if one has
    /// been created yet (spec §4.11 gauge: "retry-budget permits available").
    pub fn retry_budget_available(&self, provider_id: &str) -> Option<f64> {
        self.retry_budgets.get(provider_id).map(|b| b.available_permits())
    }

    fn bulkhead_for(&self, provider_id: &str) -> Bulkhead {
        self.bulkheads
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                Bulkhead::new(
                    self.config.bulkhead_max_concurrent,
                    self.config.bulkhead_max_wait,
                )
            })
            .clone()
    }

    fn retry_budget_for(&self, provider_id: &str) -> dashmap::mapref::one::Ref<'_, String, RetryBudget> {
        self.retry_budgets
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                RetryBudget::new(
                    self.config.retry_budget_max,
                    self.config.retry_budget_refill_per_sec,
                )
            })
            .downgrade()
    }

    /// Run the Router's strategy to pick a provider, retrying on failure
    /// per spec §4.10 until success, a non-retryable error, or the gateway
    /// deadline/retry budget is exhausted.
    pub async fn execute<F, Fut, T>(
        &self,
        model: &str,
        mut route_ctx: RouteContext,
        mut call: F,
    ) -> Result<T, CoreError>
    where
        F: FnMut(Arc<ProviderCandidate>, Duration) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let deadline = route_ctx.deadline;
        let mut backoff_state = BackoffState::new(&self.config.backoff_policy);
        let mut attempt: u32 = 0;

        loop {
            if deadline.expired() {
                return Err(CoreError::GatewayTimeout {
                    elapsed: self.config.timeout_policy.gateway_deadline,
                });
            }
            route_ctx.attempt_number = attempt;

            let selected = self.router.route(model, &route_ctx)?;
            let candidate = selected.candidate;
            let provider_id = candidate.provider_id.clone();

            let result = self.run_attempt(&candidate, model, deadline, &mut call).await;
            candidate.decr_active_connections();

            match result {
                Ok(value) => {
                    if attempt > 0 {
                        self.retry_budget_for(&provider_id).release();
                    }
                    return Ok(value);
                }
                Err(err) => {
                    self.decide_retry(err, &mut route_ctx, &provider_id, attempt, &mut backoff_state, deadline)
                        .await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Fallback-chain variant: when a client supplies an explicit ordered
    /// chain, the Coordinator promotes each failed provider's replacement
    /// directly, bypassing the Router's strategy entirely (spec §4.10).
    pub async fn execute_with_fallback_chain<F, Fut, T>(
        &self,
        chain: &[String],
        mut route_ctx: RouteContext,
        mut call: F,
    ) -> Result<T, CoreError>
    where
        F: FnMut(Arc<ProviderCandidate>, Duration) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let deadline = route_ctx.deadline;
        let mut backoff_state = BackoffState::new(&self.config.backoff_policy);

        if chain.is_empty() {
            return Err(CoreError::Validation {
                message: "fallback chain must name at least one provider".to_string(),
            });
        }

        for (attempt, provider_id) in chain.iter().enumerate() {
            if deadline.expired() {
                return Err(CoreError::GatewayTimeout {
                    elapsed: self.config.timeout_policy.gateway_deadline,
                });
            }
            let candidate = match self.router.registry().get(provider_id) {
                Some(c) => c,
                None => continue,
            };

            candidate.incr_active_connections();
            let result = self
                .run_attempt(&candidate, provider_id, deadline, &mut call)
                .await;
            candidate.decr_active_connections();

            match result {
                Ok(value) => {
                    if attempt > 0 {
                        self.retry_budget_for(provider_id).release();
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let is_last = attempt + 1 == chain.len();
                    if is_last {
                        return Err(err);
                    }
                    self.decide_retry(
                        err,
                        &mut route_ctx,
                        provider_id,
                        attempt as u32,
                        &mut backoff_state,
                        deadline,
                    )
                    .await?;
                }
            }
        }
        unreachable!("loop always returns via success or the last-chain-element branch")
    }

    /// One bulkhead→breaker→timeout→call→record cycle against a specific
    /// candidate. Terminal: callers decide whether to retry.
    async fn run_attempt<F, Fut, T>(
        &self,
        candidate: &Arc<ProviderCandidate>,
        model: &str,
        deadline: crate::timeout::GatewayDeadline,
        call: &mut F,
    ) -> Result<T, CoreError>
    where
        F: FnMut(Arc<ProviderCandidate>, Duration) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let ticket = self.bulkhead_for(&candidate.provider_id).acquire(&candidate.provider_id).await?;

        let guard = candidate.circuit_breaker.try_admit().map_err(|_| {
            CoreError::CircuitOpen {
                provider_id: candidate.provider_id.clone(),
                retry_after: candidate.circuit_breaker.retry_after(),
            }
        })?;

        let attempt_budget = match deadline.attempt_budget(&self.config.timeout_policy, model) {
            Some(budget) => budget,
            None => {
                guard.record_failure();
                drop(ticket);
                return Err(CoreError::GatewayTimeout {
                    elapsed: self.config.timeout_policy.gateway_deadline,
                });
            }
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(attempt_budget, call(candidate.clone(), attempt_budget)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(value)) => {
                guard.record_success();
                drop(ticket);
                candidate.record_outcome(true, false, latency_ms);
                Ok(value)
            }
            Ok(Err(provider_err)) => {
                let core_err = CoreError::from_provider_error(&candidate.provider_id, provider_err);
                record_breaker_outcome(&candidate.circuit_breaker, guard, &core_err);
                drop(ticket);
                candidate.record_outcome(false, false, latency_ms);
                Err(core_err)
            }
            Err(_elapsed) => {
                if candidate.circuit_breaker.config().count_timeouts_as_failures {
                    guard.record_failure();
                } else {
                    guard.record_ignored();
                }
                drop(ticket);
                candidate.record_outcome(false, true, latency_ms);
                Err(CoreError::ProviderTimeout {
                    provider_id: candidate.provider_id.clone(),
                    elapsed: attempt_budget,
                })
            }
        }
    }

    /// Decide whether `err` is retryable and, if so, draw a retry-budget
    /// permit, sleep the jittered backoff (respecting any `Retry-After`
    /// minimum and the remaining gateway budget), and mark the provider
    /// excluded for the next routing pass. Returns the terminal error when
    /// no retry is possible.
    async fn decide_retry(
        &self,
        err: CoreError,
        route_ctx: &mut RouteContext,
        provider_id: &str,
        attempt: u32,
        backoff_state: &mut BackoffState,
        deadline: crate::timeout::GatewayDeadline,
    ) -> Result<(), CoreError> {
        if !err.retryable() || attempt + 1 >= self.config.max_retries {
            return Err(err);
        }
        if !self.retry_budget_for(provider_id).try_acquire() {
            return Err(err);
        }

        let remaining = deadline.remaining();
        if remaining.is_zero() {
            return Err(err);
        }

        let mut delay = backoff_state.next_delay(&self.config.backoff_policy, attempt);
        if let Some(retry_after) = err.retry_after() {
            delay = delay.max(retry_after);
        }
        let delay = delay.min(remaining);

        tokio::time::sleep(delay).await;
        route_ctx.excluded_providers.push(provider_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::models::{
        AudioRequest, AudioResponse, ChatRequest, ChatResponse, EmbeddingRequest,
        EmbeddingResponse, ImageRequest, ImageResponse, SpeechRequest, SpeechResponse,
    };
    use crate::providers::{HealthStatus, Provider, ProviderHealth, StreamResult};
    use crate::registry::{Capabilities, ProviderRegistry};
    use crate::router::RequiredCapabilities;
    use crate::routing::{LoadBalancer, RoutingStrategyKind, SelectionContext};
    use crate::rules::RulesEngine;
    use crate::timeout::GatewayDeadline;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubProvider;

    #[async_trait::async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            "stub"
        }
        fn supports_streaming(&self) -> bool {
            false
        }
        fn supports_function_calling(&self) -> bool {
            false
        }
        fn supported_models(&self) -> Vec<String> {
            vec!["m1".to_string()]
        }
        async fn chat_completion(&self, _r: ChatRequest) -> Result<ChatResponse, ProviderError> {
            unimplemented!()
        }
        async fn stream_chat_completion(
            &self,
            _r: ChatRequest,
        ) -> Result<StreamResult, ProviderError> {
            unimplemented!()
        }
        async fn embedding(&self, _r: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            unimplemented!()
        }
        async fn image_generation(&self, _r: ImageRequest) -> Result<ImageResponse, ProviderError> {
            unimplemented!()
        }
        async fn audio_transcription(
            &self,
            _r: AudioRequest,
        ) -> Result<AudioResponse, ProviderError> {
            unimplemented!()
        }
        async fn text_to_speech(&self, _r: SpeechRequest) -> Result<SpeechResponse, ProviderError> {
            unimplemented!()
        }
        async fn health_check(&self) -> Result<ProviderHealth, ProviderError> {
            Ok(ProviderHealth {
                status: HealthStatus::Healthy,
                latency_ms: Some(1),
                error_rate: 0.0,
                last_check: chrono::Utc::now(),
                details: HashMap::new(),
            })
        }
    }

    fn capabilities() -> Capabilities {
        Capabilities {
            supported_models: vec!["m1".to_string()],
            max_context_tokens: 8192,
            streaming: true,
            tools: false,
            vision: false,
            input_cost_per_1k: 0.01,
            output_cost_per_1k: 0.02,
            weight: 1.0,
        }
    }

    fn test_coordinator() -> (Coordinator, Arc<ProviderCandidate>) {
        let registry = ProviderRegistry::new();
        let candidate = Arc::new(ProviderCandidate::new(
            "p1",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider),
            CircuitBreakerConfig::default(),
        ));
        registry.register(candidate.clone());

        let router = Router::new(
            registry,
            RulesEngine::new(Duration::from_millis(50)),
            LoadBalancer::new(RoutingStrategyKind::RoundRobin),
            RoutingStrategyKind::RoundRobin,
        );
        let mut config = CoordinatorConfig::default();
        config.bulkhead_max_wait = Duration::from_millis(100);
        config.backoff_policy.base = Duration::from_millis(1);
        config.backoff_policy.max = Duration::from_millis(5);
        (Coordinator::new(router, config), candidate)
    }

    fn route_ctx() -> RouteContext {
        RouteContext {
            tenant_id: None,
            priority: 0,
            attempt_number: 0,
            excluded_providers: Vec::new(),
            preferred_provider: None,
            cost_budget: None,
            region: None,
            deadline: GatewayDeadline::from_now(&TimeoutPolicy::default()),
            required: RequiredCapabilities::default(),
            min_health_threshold: 0.0,
            selection: SelectionContext::default(),
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let (coordinator, _candidate) = test_coordinator();
        let result = coordinator
            .execute("m1", route_ctx(), |_candidate, _budget| async { Ok(42u32) })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn retries_transient_failure_then_succeeds() {
        let (coordinator, _candidate) = test_coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result = coordinator
            .execute("m1", route_ctx(), move |_candidate, _budget| {
                let calls = calls_clone.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProviderError::ServiceUnavailable)
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_immediately() {
        let (coordinator, _candidate) = test_coordinator();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let result: Result<u32, CoreError> = coordinator
            .execute("m1", route_ctx(), move |_candidate, _budget| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::InvalidApiKey) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fallback_chain_promotes_next_provider_on_failure() {
        let registry = ProviderRegistry::new();
        let primary = Arc::new(ProviderCandidate::new(
            "primary",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider),
            CircuitBreakerConfig::default(),
        ));
        let backup = Arc::new(ProviderCandidate::new(
            "backup",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider),
            CircuitBreakerConfig::default(),
        ));
        registry.register(primary);
        registry.register(backup);

        let router = Router::new(
            registry,
            RulesEngine::new(Duration::from_millis(50)),
            LoadBalancer::new(RoutingStrategyKind::RoundRobin),
            RoutingStrategyKind::RoundRobin,
        );
        let mut config = CoordinatorConfig::default();
        config.bulkhead_max_wait = Duration::from_millis(100);
        config.backoff_policy.base = Duration::from_millis(1);
        config.backoff_policy.max = Duration::from_millis(5);
        let coordinator = Coordinator::new(router, config);

        let chain = vec!["primary".to_string(), "backup".to_string()];
        let result = coordinator
            .execute_with_fallback_chain(&chain, route_ctx(), |candidate, _budget| {
                let id = candidate.provider_id.clone();
                async move {
                    if id == "primary" {
                        Err(ProviderError::ServiceUnavailable)
                    } else {
                        Ok(id)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(result, "backup");
    }
}
