//! # Provider Registry
//!
//! Holds the live set of provider candidates the Router chooses from: a
//! concurrent, read-mostly map from provider id to candidate, a secondary
//! index from model name to the candidates that serve it, and a background
//! health-probe loop that keeps each candidate's health score current.
//!
//! The registry is the one process-wide mutable surface on the request hot
//! path. Readers (the Router, on every request) never block: `dashmap`
//! shards its locks per key, and mutation of an existing candidate's
//! telemetry goes through atomics, not the map's own locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hdrhistogram::Histogram;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::CoreError;
use crate::providers::{HealthStatus, Provider};

/// Immutable per-candidate capabilities, fixed at registration.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub supported_models: Vec<String>,
    pub max_context_tokens: u32,
    pub streaming: bool,
    pub tools: bool,
    pub vision: bool,
    /// USD per 1000 input tokens.
    pub input_cost_per_1k: f64,
    /// USD per 1000 output tokens.
    pub output_cost_per_1k: f64,
    /// Configured relative capacity, used by WeightedRoundRobin and
    /// LeastConnections (spec §4.7). Must be > 0; defaults to 1.0.
    pub weight: f64,
}

impl Capabilities {
    pub fn supports_model(&self, model: &str) -> bool {
        self.supported_models.iter().any(|m| m == model)
    }
}

/// A provider eligible to serve a request: identity, immutable capabilities,
/// and mutable, mostly-atomic telemetry (spec §3 `ProviderCandidate`).
pub struct ProviderCandidate {
    pub provider_id: String,
    pub provider_type: String,
    pub endpoint: String,
    pub region: Option<String>,
    pub capabilities: Capabilities,
    pub provider: Arc<dyn Provider>,
    pub circuit_breaker: CircuitBreaker,

    active_connections: AtomicU32,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    timeout_count: AtomicU64,
    /// Health score in [0,1], stored as a fixed-point value in `[0, 1000]`.
    health_score_milli: AtomicU32,
    available: AtomicBool,
    /// Encoded `CircuitState` for lock-free `health_snapshot()` reads: 0
    /// Closed, 1 Open, 2 HalfOpen. The breaker itself is the source of
    /// truth; this is a cached projection refreshed by the health prober.
    circuit_state_hint: AtomicU8,
    /// Latency histogram is the one candidate-local lock the spec allows;
    /// everything else here is a bare atomic.
    latency_histogram: Mutex<Histogram<u64>>,
}

impl ProviderCandidate {
    pub fn new(
        provider_id: impl Into<String>,
        provider_type: impl Into<String>,
        endpoint: impl Into<String>,
        region: Option<String>,
        capabilities: Capabilities,
        provider: Arc<dyn Provider>,
        breaker_config: CircuitBreakerConfig,
    ) -> Self {
        let provider_id = provider_id.into();
        Self {
            circuit_breaker: CircuitBreaker::new(provider_id.clone(), breaker_config),
            provider_id,
            provider_type: provider_type.into(),
            endpoint: endpoint.into(),
            region,
            capabilities,
            provider,
            active_connections: AtomicU32::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            timeout_count: AtomicU64::new(0),
            health_score_milli: AtomicU32::new(1000),
            available: AtomicBool::new(true),
            circuit_state_hint: AtomicU8::new(0),
            latency_histogram: Mutex::new(
                Histogram::new_with_bounds(1, 60_000, 3).expect("valid histogram bounds"),
            ),
        }
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn health_score(&self) -> f64 {
        self.health_score_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub(crate) fn incr_active_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decr_active_connections(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one completed attempt's outcome and latency, folding the
    /// health score toward 1.0 on success and 0.0 on failure via an EWMA
    /// (alpha = 0.2), mirroring the teacher's metrics smoothing factor.
    pub fn record_outcome(&self, success: bool, timed_out: bool, latency_ms: u64) {
        if timed_out {
            self.timeout_count.fetch_add(1, Ordering::Relaxed);
        }
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }

        let target = if success { 1000.0 } else { 0.0 };
        let alpha = 0.2;
        let prev = self.health_score_milli.load(Ordering::Relaxed) as f64;
        let next = (alpha * target + (1.0 - alpha) * prev).round().clamp(0.0, 1000.0) as u32;
        self.health_score_milli.store(next, Ordering::Relaxed);

        if let Ok(mut hist) = self.latency_histogram.lock() {
            let _ = hist.record(latency_ms.max(1));
        }

        self.circuit_state_hint
            .store(encode_circuit_state(self.circuit_breaker.state()), Ordering::Relaxed);
    }

    pub fn latency_quantile_ms(&self, quantile: f64) -> Option<u64> {
        let hist = self.latency_histogram.lock().ok()?;
        if hist.len() == 0 {
            None
        } else {
            Some(hist.value_at_quantile(quantile))
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.latency_histogram
            .lock()
            .map(|h| h.len())
            .unwrap_or(0)
    }

    pub fn success_failure_counts(&self) -> (u64, u64, u64) {
        (
            self.success_count.load(Ordering::Relaxed),
            self.failure_count.load(Ordering::Relaxed),
            self.timeout_count.load(Ordering::Relaxed),
        )
    }

    pub fn error_rate(&self) -> f64 {
        let (success, failure, _) = self.success_failure_counts();
        let total = success + failure;
        if total == 0 {
            0.0
        } else {
            failure as f64 / total as f64
        }
    }
}

impl std::fmt::Debug for ProviderCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCandidate")
            .field("provider_id", &self.provider_id)
            .field("provider_type", &self.provider_type)
            .field("available", &self.available())
            .field("health_score", &self.health_score())
            .finish()
    }
}

fn encode_circuit_state(state: CircuitState) -> u8 {
    match state {
        CircuitState::Closed => 0,
        CircuitState::Open => 1,
        CircuitState::HalfOpen => 2,
    }
}

/// Point-in-time health view for one candidate, as exposed by
/// `health_snapshot()` to the transport/admin plane (spec §6).
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub provider_id: String,
    pub available: bool,
    pub health_score: f64,
    pub circuit_state: CircuitState,
    pub active_connections: u32,
    pub error_rate: f64,
    pub p50_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
}

/// Concurrent provider registry (spec §4.1). Cheap to clone: every field is
/// an `Arc`-backed or atomic handle shared across clones.
#[derive(Clone)]
pub struct ProviderRegistry {
    by_id: Arc<DashMap<String, Arc<ProviderCandidate>>>,
    by_model: Arc<DashMap<String, Vec<Arc<ProviderCandidate>>>>,
    aliases: Arc<DashMap<String, String>>,
    tenant_overrides: Arc<DashMap<String, Vec<String>>>,
    generation: Arc<AtomicU64>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            by_id: Arc::new(DashMap::new()),
            by_model: Arc::new(DashMap::new()),
            aliases: Arc::new(DashMap::new()),
            tenant_overrides: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Register (or replace) a candidate. Idempotent: registering the same
    /// `provider_id` again replaces the prior candidate and its model-index
    /// entries. Always increases `generation`.
    pub fn register(&self, candidate: Arc<ProviderCandidate>) {
        let id = candidate.provider_id.clone();
        for model in &candidate.capabilities.supported_models {
            self.by_model
                .entry(model.clone())
                .and_modify(|v| {
                    v.retain(|c| c.provider_id != id);
                    v.push(candidate.clone());
                })
                .or_insert_with(|| vec![candidate.clone()]);
        }
        self.by_id.insert(id, candidate);
        self.bump_generation();
    }

    /// Add a model-name alias. `candidates_for(alias)` resolves through to
    /// `target`'s candidate list.
    pub fn register_alias(&self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
        self.bump_generation();
    }

    /// Restrict `tenant_id` to a specific subset of provider ids. An empty
    /// or absent entry means "no restriction".
    pub fn set_tenant_override(&self, tenant_id: impl Into<String>, provider_ids: Vec<String>) {
        self.tenant_overrides.insert(tenant_id.into(), provider_ids);
        self.bump_generation();
    }

    pub fn tenant_allowed_providers(&self, tenant_id: &str) -> Option<Vec<String>> {
        self.tenant_overrides.get(tenant_id).map(|v| v.clone())
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<ProviderCandidate>> {
        self.by_id.get(provider_id).map(|e| e.clone())
    }

    fn resolve_alias<'a>(&self, model: &'a str) -> String {
        self.aliases
            .get(model)
            .map(|t| t.clone())
            .unwrap_or_else(|| model.to_string())
    }

    pub fn candidates_for(&self, model: &str) -> Vec<Arc<ProviderCandidate>> {
        let resolved = self.resolve_alias(model);
        self.by_model
            .get(&resolved)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    /// Deregister a provider, waiting (bounded by `drain_timeout`) for its
    /// in-flight requests to finish before removing it from both indices.
    pub async fn deregister(&self, provider_id: &str, drain_timeout: Duration) -> Result<(), CoreError> {
        let candidate = match self.by_id.get(provider_id) {
            Some(c) => c.clone(),
            None => return Ok(()),
        };

        let deadline = Instant::now() + drain_timeout;
        while candidate.active_connections() > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if candidate.active_connections() > 0 {
            tracing::warn!(
                provider_id,
                in_flight = candidate.active_connections(),
                "deregistering provider with in-flight requests still draining"
            );
        }

        self.by_id.remove(provider_id);
        for mut entry in self.by_model.iter_mut() {
            entry.value_mut().retain(|c| c.provider_id != provider_id);
        }
        self.bump_generation();
        Ok(())
    }

    pub fn reset_breaker(&self, provider_id: &str) -> bool {
        if let Some(candidate) = self.get(provider_id) {
            candidate.circuit_breaker.reset();
            self.bump_generation();
            true
        } else {
            false
        }
    }

    pub fn snapshot_health(&self) -> HashMap<String, HealthSnapshot> {
        self.by_id
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    c.provider_id.clone(),
                    HealthSnapshot {
                        provider_id: c.provider_id.clone(),
                        available: c.available(),
                        health_score: c.health_score(),
                        circuit_state: c.circuit_breaker.state(),
                        active_connections: c.active_connections(),
                        error_rate: c.error_rate(),
                        p50_latency_ms: c.latency_quantile_ms(50.0),
                        p95_latency_ms: c.latency_quantile_ms(95.0),
                    },
                )
            })
            .collect()
    }

    /// Spawn the background health-probe loop (spec §4.1: every
    /// `interval`, short `timeout`, updates `available` from the probe
    /// result). Returns the task handle; dropping/aborting it stops probing.
    pub fn spawn_health_prober(
        &self,
        interval: Duration,
        timeout: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let candidates: Vec<_> = registry.by_id.iter().map(|e| e.clone()).collect();
                for candidate in candidates {
                    let result = tokio::time::timeout(timeout, candidate.provider.health_check()).await;
                    let healthy = matches!(
                        result,
                        Ok(Ok(health)) if matches!(health.status, HealthStatus::Healthy | HealthStatus::Degraded)
                    );
                    candidate.set_available(healthy);
                    if !healthy {
                        tracing::debug!(
                            provider_id = candidate.provider_id.as_str(),
                            "health probe marked provider unavailable"
                        );
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AudioRequest, AudioResponse, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ImageRequest, ImageResponse, SpeechRequest, SpeechResponse};
    use crate::providers::{ProviderHealth, StreamResult};

    struct StubProvider {
        healthy: bool,
    }

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
        async fn chat_completion(&self, _request: ChatRequest) -> Result<ChatResponse, crate::error::ProviderError> {
            unimplemented!()
        }
        async fn stream_chat_completion(&self, _request: ChatRequest) -> Result<StreamResult, crate::error::ProviderError> {
            unimplemented!()
        }
        async fn embedding(&self, _request: EmbeddingRequest) -> Result<EmbeddingResponse, crate::error::ProviderError> {
            unimplemented!()
        }
        async fn image_generation(&self, _request: ImageRequest) -> Result<ImageResponse, crate::error::ProviderError> {
            unimplemented!()
        }
        async fn audio_transcription(&self, _request: AudioRequest) -> Result<AudioResponse, crate::error::ProviderError> {
            unimplemented!()
        }
        async fn text_to_speech(&self, _request: SpeechRequest) -> Result<SpeechResponse, crate::error::ProviderError> {
            unimplemented!()
        }
        async fn health_check(&self) -> Result<ProviderHealth, crate::error::ProviderError> {
            Ok(ProviderHealth {
                status: if self.healthy { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
                latency_ms: Some(5),
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
            output_cost_per_1k: 0.03,
            weight: 1.0,
        }
    }

    #[test]
    fn register_populates_both_indices() {
        let registry = ProviderRegistry::new();
        let candidate = Arc::new(ProviderCandidate::new(
            "pA",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider { healthy: true }),
            CircuitBreakerConfig::default(),
        ));
        registry.register(candidate);

        assert!(registry.get("pA").is_some());
        assert_eq!(registry.candidates_for("m1").len(), 1);
    }

    #[test]
    fn generation_increases_on_mutation() {
        let registry = ProviderRegistry::new();
        let gen0 = registry.generation();
        let candidate = Arc::new(ProviderCandidate::new(
            "pA",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider { healthy: true }),
            CircuitBreakerConfig::default(),
        ));
        registry.register(candidate);
        assert!(registry.generation() > gen0);
    }

    #[tokio::test]
    async fn deregister_is_identity_modulo_generation() {
        let registry = ProviderRegistry::new();
        let candidate = Arc::new(ProviderCandidate::new(
            "pA",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider { healthy: true }),
            CircuitBreakerConfig::default(),
        ));
        registry.register(candidate);
        registry.deregister("pA", Duration::from_millis(50)).await.unwrap();

        assert!(registry.get("pA").is_none());
        assert!(registry.candidates_for("m1").is_empty());
    }

    #[test]
    fn alias_resolves_to_target_candidates() {
        let registry = ProviderRegistry::new();
        let candidate = Arc::new(ProviderCandidate::new(
            "pA",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider { healthy: true }),
            CircuitBreakerConfig::default(),
        ));
        registry.register(candidate);
        registry.register_alias("gpt-4-alias", "m1");

        assert_eq!(registry.candidates_for("gpt-4-alias").len(), 1);
    }

    #[test]
    fn record_outcome_updates_health_score_and_histogram() {
        let candidate = ProviderCandidate::new(
            "pA",
            "stub",
            "http://localhost",
            None,
            capabilities(),
            Arc::new(StubProvider { healthy: true }),
            CircuitBreakerConfig::default(),
        );
        candidate.record_outcome(false, false, 20);
        assert!(candidate.health_score() < 1.0);
        assert_eq!(candidate.sample_count(), 1);
    }
}
