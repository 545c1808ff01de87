//! # Router
//!
//! Composes the registry (C2), rules engine (C8), and load balancer (C7)
//! into the single hot-path algorithm a request runs through to pick one
//! provider (spec §4.9). Every step reads from lock-free structures; the
//! only mutation is incrementing the chosen candidate's `active_connections`
//! in the final step.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Timelike;

use crate::error::CoreError;
use crate::registry::{ProviderCandidate, ProviderRegistry};
use crate::routing::{LoadBalancer, RoutingStrategyKind, SelectionContext};
use crate::rules::{Action, Decision, RuleContext, RulesEngine};
use crate::timeout::GatewayDeadline;

/// Streaming/tools/vision/context-window requirements the selected
/// candidate must satisfy (spec §4.9 step 5).
#[derive(Debug, Clone, Default)]
pub struct RequiredCapabilities {
    pub streaming: bool,
    pub tools: bool,
    pub vision: bool,
    pub min_context_tokens: u32,
}

impl RequiredCapabilities {
    fn satisfied_by(&self, candidate: &ProviderCandidate) -> bool {
        let caps = &candidate.capabilities;
        (!self.streaming || caps.streaming)
            && (!self.tools || caps.tools)
            && (!self.vision || caps.vision)
            && caps.max_context_tokens >= self.min_context_tokens
    }
}

/// Per-request derived state the Router reads and the Coordinator mutates
/// between retry attempts (spec §3 `RoutingContext`).
#[derive(Debug, Clone)]
pub struct RouteContext {
    pub tenant_id: Option<String>,
    pub priority: u8,
    pub attempt_number: u32,
    pub excluded_providers: Vec<String>,
    pub preferred_provider: Option<String>,
    pub cost_budget: Option<f64>,
    pub region: Option<String>,
    pub deadline: GatewayDeadline,
    pub required: RequiredCapabilities,
    pub min_health_threshold: f64,
    pub selection: SelectionContext,
}

impl RouteContext {
    fn rule_context(&self, model: &str) -> RuleContext {
        RuleContext {
            model: model.to_string(),
            tenant_id: self.tenant_id.clone(),
            priority: self.priority,
            region: self.region.clone(),
            hour_utc: chrono::Utc::now().hour() as u8,
        }
    }
}

/// The Router's output: the chosen candidate plus observability about how
/// it was chosen.
#[derive(Debug, Clone)]
pub struct SelectedProvider {
    pub candidate: Arc<ProviderCandidate>,
    pub strategy_used: RoutingStrategyKind,
    pub candidates_considered: usize,
    pub selection_time: Duration,
}

/// Composes C2 (registry), C8 (rules), and C7 (load balancer) into the
/// spec §4.9 selection algorithm.
pub struct Router {
    registry: ProviderRegistry,
    rules: RulesEngine,
    load_balancer: LoadBalancer,
    default_strategy: RoutingStrategyKind,
}

impl Router {
    pub fn new(
        registry: ProviderRegistry,
        rules: RulesEngine,
        load_balancer: LoadBalancer,
        default_strategy: RoutingStrategyKind,
    ) -> Self {
        Self {
            registry,
            rules,
            load_balancer,
            default_strategy,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    /// Run the full 8-step algorithm and return the selected candidate.
    pub fn route(&self, model: &str, ctx: &RouteContext) -> Result<SelectedProvider, CoreError> {
        let started = Instant::now();

        // 1. Resolve alias, look up candidates.
        let mut candidates = self.registry.candidates_for(model);
        if candidates.is_empty() {
            return Err(CoreError::ModelNotSupported {
                model: model.to_string(),
            });
        }

        // 2. Drop excluded/unavailable; bring preferred to front.
        candidates.retain(|c| {
            c.available() && !ctx.excluded_providers.iter().any(|id| id == &c.provider_id)
        });
        if let Some(preferred) = &ctx.preferred_provider {
            if let Some(pos) = candidates.iter().position(|c| &c.provider_id == preferred) {
                let preferred_candidate = candidates.remove(pos);
                candidates.insert(0, preferred_candidate);
            }
        }

        // 3. Tenant policy: keep only allowed providers, reordered by the
        // allowed list's own preference order.
        if let Some(tenant_id) = &ctx.tenant_id {
            if let Some(allowed) = self.registry.tenant_allowed_providers(tenant_id) {
                candidates.retain(|c| allowed.iter().any(|id| id == &c.provider_id));
                candidates.sort_by_key(|c| {
                    allowed
                        .iter()
                        .position(|id| id == &c.provider_id)
                        .unwrap_or(usize::MAX)
                });
            }
        }

        // 4. Rules engine: narrow the candidate set and/or override strategy.
        let mut strategy = self.default_strategy;
        let decision = self.rules.evaluate(&ctx.rule_context(model));
        if let Decision::Matched { action, .. } = decision {
            apply_action(&action, &mut candidates, &mut strategy)?;
        }

        // 5. Capability filter.
        candidates.retain(|c| ctx.required.satisfied_by(c));

        // 6. Health filter, with an open-breaker-but-elapsed-timeout fallback.
        let healthy: Vec<_> = candidates
            .iter()
            .filter(|c| is_health_eligible(c, ctx.min_health_threshold))
            .cloned()
            .collect();
        let candidates = if !healthy.is_empty() {
            healthy
        } else {
            let recoverable: Vec<_> = candidates
                .iter()
                .filter(|c| {
                    c.health_score() >= ctx.min_health_threshold
                        && c.circuit_breaker.retry_after() == Duration::ZERO
                })
                .cloned()
                .collect();
            if recoverable.is_empty() {
                return Err(CoreError::AllProvidersUnhealthy {
                    model: model.to_string(),
                });
            }
            recoverable
        };

        // 7. Cost budget filter.
        let candidates = if let Some(budget) = ctx.cost_budget {
            let affordable: Vec<_> = candidates
                .iter()
                .filter(|c| estimated_cost(c, &ctx.selection) <= budget)
                .cloned()
                .collect();
            if affordable.is_empty() {
                let cheapest = candidates
                    .iter()
                    .map(|c| estimated_cost(c, &ctx.selection))
                    .fold(f64::INFINITY, f64::min);
                return Err(CoreError::BudgetExceeded {
                    estimated_cost: cheapest,
                    budget,
                });
            }
            affordable
        } else {
            candidates
        };

        let candidates_considered = candidates.len();

        // 8. Strategy selection.
        let chosen = self
            .load_balancer
            .select_with(strategy, &candidates, &ctx.selection)
            .ok_or_else(|| CoreError::AllProvidersUnhealthy {
                model: model.to_string(),
            })?;
        chosen.incr_active_connections();

        Ok(SelectedProvider {
            candidate: chosen,
            strategy_used: strategy,
            candidates_considered,
            selection_time: started.elapsed(),
        })
    }
}

fn is_health_eligible(candidate: &ProviderCandidate, min_health_threshold: f64) -> bool {
    use crate::circuit_breaker::CircuitState;
    candidate.health_score() >= min_health_threshold
        && candidate.circuit_breaker.state() != CircuitState::Open
}

fn estimated_cost(candidate: &ProviderCandidate, selection: &SelectionContext) -> f64 {
    let input = (selection.estimated_prompt_tokens as f64 / 1000.0)
        * candidate.capabilities.input_cost_per_1k;
    let output = (selection.estimated_max_tokens as f64 / 1000.0)
        * candidate.capabilities.output_cost_per_1k;
    input + output
}

/// Apply a matched rule's action to the in-progress candidate set and/or
/// strategy selection. `Reject` short-circuits with a terminal error.
fn apply_action(
    action: &Action,
    candidates: &mut Vec<Arc<ProviderCandidate>>,
    strategy: &mut RoutingStrategyKind,
) -> Result<(), CoreError> {
    match action {
        Action::RouteTo(id) => {
            candidates.retain(|c| &c.provider_id == id);
        }
        Action::RouteToPool(ids) => {
            candidates.retain(|c| ids.iter().any(|id| id == &c.provider_id));
        }
        Action::ApplyStrategy(kind) => {
            *strategy = *kind;
        }
        Action::SetPriority(_) => {
            // Priority is an input to rule matching itself; once a rule has
            // matched there's nothing further in this request to reapply it
            // to, so this is a no-op placeholder for the next evaluation.
        }
        Action::Reject(reason) => {
            return Err(CoreError::NotSupported {
                message: reason.clone(),
            });
        }
        Action::Chain(actions) => {
            for inner in actions {
                apply_action(inner, candidates, strategy)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::error::ProviderError;
    use crate::models::{
        AudioRequest, AudioResponse, ChatRequest, ChatResponse, EmbeddingRequest,
        EmbeddingResponse, ImageRequest, ImageResponse, SpeechRequest, SpeechResponse,
    };
    use crate::providers::{HealthStatus, Provider, ProviderHealth, StreamResult};
    use crate::registry::Capabilities;
    use crate::rules::{Matcher, Predicate, Rule};
    use std::collections::HashMap;
    use std::time::Duration;

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

    fn candidate(id: &str) -> Arc<ProviderCandidate> {
        Arc::new(ProviderCandidate::new(
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
                weight: 1.0,
            },
            Arc::new(StubProvider),
            CircuitBreakerConfig::default(),
        ))
    }

    fn default_ctx() -> RouteContext {
        RouteContext {
            tenant_id: None,
            priority: 0,
            attempt_number: 0,
            excluded_providers: Vec::new(),
            preferred_provider: None,
            cost_budget: None,
            region: None,
            deadline: GatewayDeadline::from_now(&crate::timeout::TimeoutPolicy::default()),
            required: RequiredCapabilities::default(),
            min_health_threshold: 0.0,
            selection: SelectionContext::default(),
        }
    }

    fn router_with(candidates: Vec<Arc<ProviderCandidate>>) -> Router {
        let registry = ProviderRegistry::new();
        for c in candidates {
            registry.register(c);
        }
        Router::new(
            registry,
            RulesEngine::new(Duration::from_millis(50)),
            LoadBalancer::new(RoutingStrategyKind::RoundRobin),
            RoutingStrategyKind::RoundRobin,
        )
    }

    #[test]
    fn unknown_model_fails_model_not_supported() {
        let router = router_with(vec![candidate("a")]);
        let result = router.route("no-such-model", &default_ctx());
        assert!(matches!(result, Err(CoreError::ModelNotSupported { .. })));
    }

    #[test]
    fn selects_and_increments_active_connections() {
        let router = router_with(vec![candidate("a"), candidate("b")]);
        let selected = router.route("m1", &default_ctx()).unwrap();
        assert_eq!(selected.candidate.active_connections(), 1);
        assert_eq!(selected.candidates_considered, 2);
    }

    #[test]
    fn excluded_provider_is_skipped() {
        let router = router_with(vec![candidate("a"), candidate("b")]);
        let mut ctx = default_ctx();
        ctx.excluded_providers.push("a".to_string());

        for _ in 0..3 {
            let selected = router.route("m1", &ctx).unwrap();
            assert_eq!(selected.candidate.provider_id, "b");
        }
    }

    #[test]
    fn all_candidates_unavailable_fails_all_providers_unhealthy() {
        let a = candidate("a");
        a.set_available(false);
        let router = router_with(vec![a]);
        let result = router.route("m1", &default_ctx());
        assert!(matches!(result, Err(CoreError::AllProvidersUnhealthy { .. })));
    }

    #[test]
    fn rule_reject_short_circuits() {
        let router = router_with(vec![candidate("a")]);
        router.rules().upsert_rule(Rule {
            id: "block-m1".to_string(),
            priority: 100,
            predicate: Predicate::Is(Matcher::Model("m1".to_string())),
            action: Action::Reject("no access".to_string()),
        });

        let result = router.route("m1", &default_ctx());
        assert!(matches!(result, Err(CoreError::NotSupported { .. })));
    }

    #[test]
    fn rule_route_to_pool_narrows_candidates() {
        let router = router_with(vec![candidate("a"), candidate("b"), candidate("c")]);
        router.rules().upsert_rule(Rule {
            id: "pool".to_string(),
            priority: 100,
            predicate: Predicate::Is(Matcher::Model("m1".to_string())),
            action: Action::RouteToPool(vec!["b".to_string(), "c".to_string()]),
        });

        for _ in 0..4 {
            let selected = router.route("m1", &default_ctx()).unwrap();
            assert_ne!(selected.candidate.provider_id, "a");
        }
    }

    #[test]
    fn cost_budget_excludes_expensive_candidates() {
        let cheap = candidate("cheap");
        let pricey = Arc::new(ProviderCandidate::new(
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
                input_cost_per_1k: 10.0,
                output_cost_per_1k: 10.0,
                weight: 1.0,
            },
            Arc::new(StubProvider),
            CircuitBreakerConfig::default(),
        ));
        let router = router_with(vec![cheap, pricey]);
        let mut ctx = default_ctx();
        ctx.cost_budget = Some(0.05);
        ctx.selection.estimated_prompt_tokens = 1000;
        ctx.selection.estimated_max_tokens = 500;

        let selected = router.route("m1", &ctx).unwrap();
        assert_eq!(selected.candidate.provider_id, "cheap");
    }

    #[test]
    fn capability_filter_excludes_unsupporting_candidates() {
        let router = router_with(vec![candidate("a")]);
        let mut ctx = default_ctx();
        ctx.required.tools = true;

        let result = router.route("m1", &ctx);
        assert!(matches!(result, Err(CoreError::AllProvidersUnhealthy { .. })));
    }
}
