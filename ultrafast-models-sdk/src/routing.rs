//! # Load Balancing Strategies
//!
//! Candidate-based provider selection for the routing core. A [`LoadBalancer`]
//! holds one [`Strategy`] per [`RoutingStrategyKind`] and dispatches `select`
//! to whichever kind the rules engine or gateway config picked for a request.
//!
//! ## Strategies
//!
//! - **Round Robin / Weighted Round Robin**: Cycle through healthy candidates,
//!   optionally weighted by smoothed success rate.
//! - **Least Connections**: Route to the candidate with the fewest in-flight requests.
//! - **Least Latency**: Route to the candidate with the lowest recent latency.
//! - **Cost Optimized**: Prefer the cheapest candidate able to serve the request.
//! - **Adaptive**: Thompson sampling over each candidate's observed success rate.
//! - **Random**: Uniform random selection among healthy candidates.
//!
//! Every attempt feeds its [`Outcome`] back into the strategy via
//! [`LoadBalancer::record`] so future selections reflect live provider health.
//!
//! ```rust
//! use ultrafast_models_sdk::routing::{LoadBalancer, RoutingStrategyKind, SelectionContext};
//!
//! let balancer = LoadBalancer::new(RoutingStrategyKind::WeightedRoundRobin);
//! let context = SelectionContext::default();
//! // let selected = balancer.select(&candidates, &context);
//! ```

// ---------------------------------------------------------------------
// Load balancer: candidate-based selection strategies (spec §4.7).
//
// These strategies select from the registry's `Arc<ProviderCandidate>` pool
// directly and are what the Router composes after the rules engine and
// health/capability filters have narrowed the candidate set.
// ---------------------------------------------------------------------

use std::sync::atomic::{AtomicU64 as LbAtomicU64, AtomicUsize, Ordering as LbOrdering};
use std::sync::Arc as LbArc;

use dashmap::DashMap;
use rand::Rng;
use rand_distr::{Beta, Distribution};
use serde::{Deserialize, Serialize};

use crate::registry::ProviderCandidate;

/// Which [`Strategy`] a [`LoadBalancer`] should run, as referenced by the
/// rules engine's `Action::ApplyStrategy` and by gateway configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingStrategyKind {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    LeastLatency,
    CostOptimized,
    Adaptive,
    Random,
}

/// The outcome of one provider attempt, fed back into a strategy via
/// [`Strategy::record`] to inform future selections (e.g. Adaptive's
/// Thompson sampling, WeightedRoundRobin's smooth-weight counters).
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Success { latency_ms: u64 },
    Failure,
    Timeout,
}

/// Per-request inputs a [`Strategy`] may need beyond the candidate list
/// itself: token estimates for cost scoring, and the latency quantile/
/// minimum-sample threshold LeastLatency uses to treat a cold candidate as
/// "unknown" rather than penalizing it as slow.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub estimated_prompt_tokens: u64,
    pub estimated_max_tokens: u64,
    pub latency_quantile: f64,
    pub min_latency_samples: u64,
}

impl Default for SelectionContext {
    fn default() -> Self {
        Self {
            estimated_prompt_tokens: 0,
            estimated_max_tokens: 0,
            latency_quantile: 95.0,
            min_latency_samples: 20,
        }
    }
}

/// A provider-selection algorithm over the registry's live candidate pool.
///
/// Implementations must be safe to call concurrently from many requests;
/// any mutable state a strategy keeps (round-robin cursors, WRR weights,
/// Adaptive's Beta parameters) lives behind atomics or a concurrent map.
pub trait Strategy: Send + Sync {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>>;

    /// Feed an attempt's outcome back to the strategy. Strategies that don't
    /// adapt (RoundRobin, Random) ignore this.
    fn record(&self, _provider_id: &str, _outcome: Outcome) {}
}

/// Deterministic tie-break: higher health score first, then lower
/// `provider_id` lexicographically, so ties resolve the same way on every
/// replica without coordination.
fn tie_break<'a>(
    a: &'a LbArc<ProviderCandidate>,
    b: &'a LbArc<ProviderCandidate>,
) -> std::cmp::Ordering {
    b.health_score()
        .partial_cmp(&a.health_score())
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.provider_id.cmp(&b.provider_id))
}

fn best_by<F>(candidates: &[LbArc<ProviderCandidate>], mut score: F) -> Option<LbArc<ProviderCandidate>>
where
    F: FnMut(&LbArc<ProviderCandidate>) -> f64,
{
    candidates
        .iter()
        .min_by(|a, b| {
            score(a)
                .partial_cmp(&score(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie_break(a, b))
        })
        .cloned()
}

/// Cycles through candidates in order, independent of load or health.
#[derive(Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

impl Strategy for RoundRobinStrategy {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        _ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, LbOrdering::Relaxed) % candidates.len();
        Some(candidates[idx].clone())
    }
}

/// Smooth weighted round robin: each candidate accrues `weight` every pick
/// and the one with the highest accrued value is chosen and debited by the
/// total weight, spreading selections proportionally without bursts.
#[derive(Default)]
pub struct WeightedRoundRobinStrategy {
    current_weight: DashMap<String, i64>,
}

impl WeightedRoundRobinStrategy {
    /// The candidate's configured weight, scaled to a fixed-point integer
    /// and modulated by its current health score so a degrading candidate
    /// gradually loses share without needing a reconfiguration.
    fn weight_of(candidate: &ProviderCandidate) -> i64 {
        let scaled = candidate.capabilities.weight * candidate.health_score().max(0.01) * 100.0;
        (scaled as i64).max(1)
    }
}

impl Strategy for WeightedRoundRobinStrategy {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        _ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        if candidates.is_empty() {
            return None;
        }
        let total_weight: i64 = candidates.iter().map(|c| Self::weight_of(c)).sum();

        for candidate in candidates {
            let weight = Self::weight_of(candidate);
            *self
                .current_weight
                .entry(candidate.provider_id.clone())
                .or_insert(0) += weight;
        }

        let picked = candidates
            .iter()
            .max_by(|a, b| {
                let wa = *self.current_weight.get(&a.provider_id).unwrap();
                let wb = *self.current_weight.get(&b.provider_id).unwrap();
                wa.cmp(&wb).then_with(|| tie_break(a, b).reverse())
            })
            .cloned()?;

        if let Some(mut entry) = self.current_weight.get_mut(&picked.provider_id) {
            *entry -= total_weight;
        }
        Some(picked)
    }
}

/// Picks the candidate minimizing `active_connections * (1000/weight)`, so
/// a candidate configured with double the weight absorbs roughly double
/// the concurrent load before being deprioritized (spec §4.7).
#[derive(Default)]
pub struct LeastConnectionsStrategy;

impl Strategy for LeastConnectionsStrategy {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        _ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        best_by(candidates, |c| {
            let weight = c.capabilities.weight.max(0.01);
            c.active_connections() as f64 * (1000.0 / weight)
        })
    }
}

/// Picks the candidate with the lowest latency at a configured quantile.
/// Candidates below `min_latency_samples` are treated as unknown and
/// weighted against: they never beat a candidate with confirmed latency
/// data, only each other (spec §4.7).
#[derive(Default)]
pub struct LeastLatencyStrategy;

impl Strategy for LeastLatencyStrategy {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        best_by(candidates, |c| {
            if c.sample_count() < ctx.min_latency_samples {
                f64::MAX
            } else {
                c.latency_quantile_ms(ctx.latency_quantile).unwrap_or(0) as f64
            }
        })
    }
}

/// Picks the candidate with the lowest estimated dollar cost for this
/// request, per the prompt/completion token split in [`SelectionContext`].
#[derive(Default)]
pub struct CostOptimizedStrategy;

impl CostOptimizedStrategy {
    fn estimated_cost(candidate: &ProviderCandidate, ctx: &SelectionContext) -> f64 {
        let input = (ctx.estimated_prompt_tokens as f64 / 1000.0)
            * candidate.capabilities.input_cost_per_1k;
        let output = (ctx.estimated_max_tokens as f64 / 1000.0)
            * candidate.capabilities.output_cost_per_1k;
        input + output
    }
}

impl Strategy for CostOptimizedStrategy {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        best_by(candidates, |c| Self::estimated_cost(c, ctx))
    }
}

/// Per-candidate Beta distribution parameters for Thompson sampling,
/// fixed-point so updates stay lock-free.
struct BetaState {
    alpha_milli: LbAtomicU64,
    beta_milli: LbAtomicU64,
}

impl Default for BetaState {
    fn default() -> Self {
        Self {
            alpha_milli: LbAtomicU64::new(1000),
            beta_milli: LbAtomicU64::new(1000),
        }
    }
}

/// Thompson sampling over a Beta(success, failure) posterior per candidate:
/// draws one sample per candidate and picks the highest, so strategies that
/// have seen more successes are preferred but never deterministically
/// starve an under-sampled candidate (spec §4.7 "Adaptive").
#[derive(Default)]
pub struct AdaptiveStrategy {
    state: DashMap<String, BetaState>,
}

impl Strategy for AdaptiveStrategy {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        _ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        if candidates.is_empty() {
            return None;
        }
        let mut rng = rand::thread_rng();
        let mut best: Option<(LbArc<ProviderCandidate>, f64)> = None;

        for candidate in candidates {
            let entry = self.state.entry(candidate.provider_id.clone()).or_default();
            let alpha = entry.alpha_milli.load(LbOrdering::Relaxed) as f64 / 1000.0;
            let beta = entry.beta_milli.load(LbOrdering::Relaxed) as f64 / 1000.0;
            drop(entry);

            let sample = Beta::new(alpha.max(0.01), beta.max(0.01))
                .map(|dist| dist.sample(&mut rng))
                .unwrap_or(0.5);

            best = match best {
                Some((_, best_sample)) if sample < best_sample => best,
                Some((ref best_candidate, best_sample)) if sample == best_sample => {
                    if tie_break(candidate, best_candidate) == std::cmp::Ordering::Less {
                        Some((candidate.clone(), sample))
                    } else {
                        Some((best_candidate.clone(), best_sample))
                    }
                }
                _ => Some((candidate.clone(), sample)),
            };
        }
        best.map(|(candidate, _)| candidate)
    }

    fn record(&self, provider_id: &str, outcome: Outcome) {
        let entry = self.state.entry(provider_id.to_string()).or_default();
        match outcome {
            Outcome::Success { .. } => {
                entry.alpha_milli.fetch_add(1000, LbOrdering::Relaxed);
            }
            Outcome::Failure | Outcome::Timeout => {
                entry.beta_milli.fetch_add(1000, LbOrdering::Relaxed);
            }
        }
    }
}

/// Picks uniformly at random among candidates, for A/B baselines and chaos
/// testing.
#[derive(Default)]
pub struct RandomStrategy;

impl Strategy for RandomStrategy {
    fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        _ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx].clone())
    }
}

/// Dispatches to one of the seven strategies above by [`RoutingStrategyKind`],
/// holding one instance of each so stateful strategies (WRR counters,
/// Adaptive's Beta posteriors) persist across requests rather than resetting
/// every call.
pub struct LoadBalancer {
    default_kind: RoutingStrategyKind,
    round_robin: RoundRobinStrategy,
    weighted_round_robin: WeightedRoundRobinStrategy,
    least_connections: LeastConnectionsStrategy,
    least_latency: LeastLatencyStrategy,
    cost_optimized: CostOptimizedStrategy,
    adaptive: AdaptiveStrategy,
    random: RandomStrategy,
}

impl LoadBalancer {
    pub fn new(default_kind: RoutingStrategyKind) -> Self {
        Self {
            default_kind,
            round_robin: RoundRobinStrategy::default(),
            weighted_round_robin: WeightedRoundRobinStrategy::default(),
            least_connections: LeastConnectionsStrategy,
            least_latency: LeastLatencyStrategy,
            cost_optimized: CostOptimizedStrategy,
            adaptive: AdaptiveStrategy::default(),
            random: RandomStrategy,
        }
    }

    fn strategy_for(&self, kind: RoutingStrategyKind) -> &dyn Strategy {
        match kind {
            RoutingStrategyKind::RoundRobin => &self.round_robin,
            RoutingStrategyKind::WeightedRoundRobin => &self.weighted_round_robin,
            RoutingStrategyKind::LeastConnections => &self.least_connections,
            RoutingStrategyKind::LeastLatency => &self.least_latency,
            RoutingStrategyKind::CostOptimized => &self.cost_optimized,
            RoutingStrategyKind::Adaptive => &self.adaptive,
            RoutingStrategyKind::Random => &self.random,
        }
    }

    pub fn select(
        &self,
        candidates: &[LbArc<ProviderCandidate>],
        ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        self.select_with(self.default_kind, candidates, ctx)
    }

    pub fn select_with(
        &self,
        kind: RoutingStrategyKind,
        candidates: &[LbArc<ProviderCandidate>],
        ctx: &SelectionContext,
    ) -> Option<LbArc<ProviderCandidate>> {
        self.strategy_for(kind).select(candidates, ctx)
    }

    pub fn record(&self, kind: RoutingStrategyKind, provider_id: &str, outcome: Outcome) {
        self.strategy_for(kind).record(provider_id, outcome);
    }
}

#[cfg(test)]
mod load_balancer_tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::error::ProviderError;
    use crate::models::{
        AudioRequest, AudioResponse, ChatRequest, ChatResponse, EmbeddingRequest,
        EmbeddingResponse, ImageRequest, ImageResponse, SpeechRequest, SpeechResponse,
    };
    use crate::providers::{HealthStatus, Provider, ProviderHealth, StreamResult};
    use crate::registry::Capabilities;
    use std::collections::HashMap;

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
        async fn stream_chat_completion(&self, _r: ChatRequest) -> Result<StreamResult, ProviderError> {
            unimplemented!()
        }
        async fn embedding(&self, _r: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
            unimplemented!()
        }
        async fn image_generation(&self, _r: ImageRequest) -> Result<ImageResponse, ProviderError> {
            unimplemented!()
        }
        async fn audio_transcription(&self, _r: AudioRequest) -> Result<AudioResponse, ProviderError> {
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

    fn candidate(id: &str) -> LbArc<ProviderCandidate> {
        weighted_candidate(id, 1.0)
    }

    fn weighted_candidate(id: &str, weight: f64) -> LbArc<ProviderCandidate> {
        LbArc::new(ProviderCandidate::new(
            id,
            "stub",
            "http://localhost",
            None,
            Capabilities {
                supported_models: vec!["m1".to_string()],
                max_context_tokens: 8192,
                streaming: true,
                tools: false,
                vision: false,
                input_cost_per_1k: 0.01,
                output_cost_per_1k: 0.02,
                weight,
            },
            LbArc::new(StubProvider),
            CircuitBreakerConfig::default(),
        ))
    }

    #[test]
    fn weighted_round_robin_favors_higher_weight_two_to_one() {
        let strategy = WeightedRoundRobinStrategy::default();
        let heavy = weighted_candidate("heavy", 2.0);
        let light = weighted_candidate("light", 1.0);
        let candidates = vec![heavy, light];
        let ctx = SelectionContext::default();

        let mut heavy_picks = 0;
        for _ in 0..9 {
            if strategy.select(&candidates, &ctx).unwrap().provider_id == "heavy" {
                heavy_picks += 1;
            }
        }
        assert_eq!(heavy_picks, 6);
    }

    #[test]
    fn round_robin_cycles_through_all_candidates() {
        let strategy = RoundRobinStrategy::default();
        let candidates = vec![candidate("a"), candidate("b"), candidate("c")];
        let ctx = SelectionContext::default();

        let picks: Vec<String> = (0..6)
            .map(|_| strategy.select(&candidates, &ctx).unwrap().provider_id.clone())
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn least_connections_picks_idlest_candidate() {
        let strategy = LeastConnectionsStrategy;
        let busy = candidate("busy");
        let idle = candidate("idle");
        busy.incr_active_connections();
        busy.incr_active_connections();

        let picked = strategy
            .select(&[busy.clone(), idle.clone()], &SelectionContext::default())
            .unwrap();
        assert_eq!(picked.provider_id, "idle");
    }

    #[test]
    fn cost_optimized_prefers_cheaper_candidate() {
        let strategy = CostOptimizedStrategy;
        let cheap = candidate("cheap");
        let pricey = ProviderCandidate::new(
            "pricey",
            "stub",
            "http://localhost",
            None,
            Capabilities {
                supported_models: vec!["m1".to_string()],
                max_context_tokens: 8192,
                streaming: true,
                tools: false,
                vision: false,
                input_cost_per_1k: 1.0,
                output_cost_per_1k: 2.0,
                weight: 1.0,
            },
            LbArc::new(StubProvider),
            CircuitBreakerConfig::default(),
        );
        let ctx = SelectionContext {
            estimated_prompt_tokens: 1000,
            estimated_max_tokens: 500,
            ..SelectionContext::default()
        };

        let picked = strategy
            .select(&[cheap.clone(), LbArc::new(pricey)], &ctx)
            .unwrap();
        assert_eq!(picked.provider_id, "cheap");
    }

    #[test]
    fn least_latency_prefers_known_candidate_over_cold_unknown() {
        let strategy = LeastLatencyStrategy;
        let warmed = candidate("warmed");
        for _ in 0..25 {
            warmed.record_outcome(true, false, 500);
        }
        let cold = candidate("cold");

        let ctx = SelectionContext {
            min_latency_samples: 20,
            ..SelectionContext::default()
        };
        let picked = strategy
            .select(&[warmed.clone(), cold.clone()], &ctx)
            .unwrap();
        assert_eq!(picked.provider_id, "warmed");
    }

    #[test]
    fn least_latency_tie_breaks_among_unknown_candidates() {
        let strategy = LeastLatencyStrategy;
        let a = candidate("a");
        let b = candidate("b");
        let ctx = SelectionContext {
            min_latency_samples: 20,
            ..SelectionContext::default()
        };
        let picked = strategy.select(&[b.clone(), a.clone()], &ctx).unwrap();
        assert_eq!(picked.provider_id, "a");
    }

    #[test]
    fn adaptive_strategy_always_returns_a_candidate() {
        let strategy = AdaptiveStrategy::default();
        let candidates = vec![candidate("a"), candidate("b")];
        let ctx = SelectionContext::default();
        for _ in 0..10 {
            let picked = strategy.select(&candidates, &ctx).unwrap();
            strategy.record(&picked.provider_id, Outcome::Success { latency_ms: 10 });
        }
    }

    #[test]
    fn empty_candidate_list_yields_no_selection() {
        let ctx = SelectionContext::default();
        assert!(RoundRobinStrategy::default().select(&[], &ctx).is_none());
        assert!(LeastConnectionsStrategy.select(&[], &ctx).is_none());
        assert!(RandomStrategy.select(&[], &ctx).is_none());
    }
}
