//! # Rules Engine
//!
//! Priority-ordered predicate rules that narrow the candidate set and/or
//! override the selected strategy before the Router's health/capability
//! filters run (spec §4.8). Matchers compose via `And`/`Or`/`Not`; a rule's
//! action can route to a specific pool, force a strategy, bump priority, or
//! reject the request outright.
//!
//! Evaluation is memoized per `(model, tenant, priority, region)` with a
//! short TTL so repeated identical lookups stay under the spec's 50 µs
//! target; the cache invalidates whenever the rule set is mutated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::routing::RoutingStrategyKind;

/// A single atomic predicate over request context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Matcher {
    Model(String),
    Tenant(String),
    Priority(u8),
    Region(String),
    /// Inclusive `[start_hour, end_hour)` in UTC, 0-23.
    TimeWindow { start_hour: u8, end_hour: u8 },
}

impl Matcher {
    fn matches(&self, ctx: &RuleContext) -> bool {
        match self {
            Matcher::Model(m) => ctx.model == *m,
            Matcher::Tenant(t) => ctx.tenant_id.as_deref() == Some(t.as_str()),
            Matcher::Priority(p) => ctx.priority == *p,
            Matcher::Region(r) => ctx.region.as_deref() == Some(r.as_str()),
            Matcher::TimeWindow { start_hour, end_hour } => {
                let hour = ctx.hour_utc;
                if start_hour <= end_hour {
                    hour >= *start_hour && hour < *end_hour
                } else {
                    // wraps midnight
                    hour >= *start_hour || hour < *end_hour
                }
            }
        }
    }
}

/// Composable predicate tree: `And`/`Or`/`Not` over [`Matcher`] leaves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    Is(Matcher),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn matches(&self, ctx: &RuleContext) -> bool {
        match self {
            Predicate::Is(m) => m.matches(ctx),
            Predicate::And(ps) => ps.iter().all(|p| p.matches(ctx)),
            Predicate::Or(ps) => ps.iter().any(|p| p.matches(ctx)),
            Predicate::Not(p) => !p.matches(ctx),
        }
    }
}

/// What a matched rule does to the candidate set / strategy choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Action {
    RouteTo(String),
    RouteToPool(Vec<String>),
    ApplyStrategy(RoutingStrategyKind),
    SetPriority(u8),
    Reject(String),
    Chain(Vec<Action>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub priority: i64,
    pub predicate: Predicate,
    pub action: Action,
}

/// Per-request context the rules engine matches and memoizes against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleCacheKey {
    model: String,
    tenant_id: Option<String>,
    priority: u8,
    region: Option<String>,
}

/// The full evaluation context, including fields that affect matching but
/// are deliberately excluded from the memoization key (time-of-day), since
/// including them would make the cache miss on almost every request.
#[derive(Debug, Clone)]
pub struct RuleContext {
    pub model: String,
    pub tenant_id: Option<String>,
    pub priority: u8,
    pub region: Option<String>,
    pub hour_utc: u8,
}

impl RuleContext {
    fn cache_key(&self) -> RuleCacheKey {
        RuleCacheKey {
            model: self.model.clone(),
            tenant_id: self.tenant_id.clone(),
            priority: self.priority,
            region: self.region.clone(),
        }
    }
}

/// Outcome of evaluating the rule set against one context.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No rule matched; fall through to the configured default strategy.
    Fallthrough,
    Matched { rule_id: String, action: Action },
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        format!("{self:?}") == format!("{other:?}")
    }
}

struct CacheEntry {
    decision: Decision,
    expires_at: Instant,
}

/// Priority-sorted rule list with a TTL-memoized decision cache (spec §4.8).
/// Reads never block each other; mutation swaps the whole rule `Vec` behind
/// a short write lock, matching the spec's "readers never block each other"
/// requirement for the rules list.
pub struct RulesEngine {
    rules: std::sync::RwLock<Vec<Rule>>,
    cache: DashMap<RuleCacheKey, CacheEntry>,
    cache_ttl: Duration,
    generation: AtomicU64,
}

impl RulesEngine {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            rules: std::sync::RwLock::new(Vec::new()),
            cache: DashMap::new(),
            cache_ttl,
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Insert or replace a rule by id, re-sort by descending priority, and
    /// invalidate the decision cache.
    pub fn upsert_rule(&self, rule: Rule) {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        rules.retain(|r| r.id != rule.id);
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        drop(rules);
        self.invalidate();
    }

    pub fn remove_rule(&self, id: &str) {
        let mut rules = self.rules.write().expect("rules lock poisoned");
        rules.retain(|r| r.id != id);
        drop(rules);
        self.invalidate();
    }

    fn invalidate(&self) {
        self.cache.clear();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Evaluate rules in descending-priority order, returning the first
    /// match (or `Fallthrough`). Memoized for `cache_ttl`.
    pub fn evaluate(&self, ctx: &RuleContext) -> Decision {
        let key = ctx.cache_key();
        if let Some(entry) = self.cache.get(&key) {
            if entry.expires_at > Instant::now() {
                return entry.decision.clone();
            }
        }

        let rules = self.rules.read().expect("rules lock poisoned");
        let decision = rules
            .iter()
            .find(|r| r.predicate.matches(ctx))
            .map(|r| Decision::Matched {
                rule_id: r.id.clone(),
                action: r.action.clone(),
            })
            .unwrap_or(Decision::Fallthrough);
        drop(rules);

        self.cache.insert(
            key,
            CacheEntry {
                decision: decision.clone(),
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(model: &str, tenant: Option<&str>) -> RuleContext {
        RuleContext {
            model: model.to_string(),
            tenant_id: tenant.map(String::from),
            priority: 0,
            region: None,
            hour_utc: 12,
        }
    }

    #[test]
    fn fallthrough_with_no_rules() {
        let engine = RulesEngine::new(Duration::from_millis(50));
        assert_eq!(engine.evaluate(&ctx("m1", None)), Decision::Fallthrough);
    }

    #[test]
    fn matches_and_predicate_over_model_and_tenant() {
        let engine = RulesEngine::new(Duration::from_millis(50));
        engine.upsert_rule(Rule {
            id: "r1".to_string(),
            priority: 100,
            predicate: Predicate::And(vec![
                Predicate::Is(Matcher::Model("m1".to_string())),
                Predicate::Is(Matcher::Tenant("T1".to_string())),
            ]),
            action: Action::RouteToPool(vec!["pA".to_string()]),
        });

        let decision = engine.evaluate(&ctx("m1", Some("T1")));
        assert!(matches!(decision, Decision::Matched { ref rule_id, .. } if rule_id == "r1"));

        assert_eq!(engine.evaluate(&ctx("m1", Some("T2"))), Decision::Fallthrough);
    }

    #[test]
    fn higher_priority_rule_wins() {
        let engine = RulesEngine::new(Duration::from_millis(50));
        engine.upsert_rule(Rule {
            id: "low".to_string(),
            priority: 1,
            predicate: Predicate::Is(Matcher::Model("m1".to_string())),
            action: Action::Reject("low".to_string()),
        });
        engine.upsert_rule(Rule {
            id: "high".to_string(),
            priority: 100,
            predicate: Predicate::Is(Matcher::Model("m1".to_string())),
            action: Action::Reject("high".to_string()),
        });

        let decision = engine.evaluate(&ctx("m1", None));
        assert!(matches!(decision, Decision::Matched { ref rule_id, .. } if rule_id == "high"));
    }

    #[test]
    fn mutation_invalidates_cache() {
        let engine = RulesEngine::new(Duration::from_secs(60));
        assert_eq!(engine.evaluate(&ctx("m1", None)), Decision::Fallthrough);

        engine.upsert_rule(Rule {
            id: "r1".to_string(),
            priority: 1,
            predicate: Predicate::Is(Matcher::Model("m1".to_string())),
            action: Action::Reject("nope".to_string()),
        });

        assert!(matches!(engine.evaluate(&ctx("m1", None)), Decision::Matched { .. }));
    }

    #[test]
    fn not_predicate_negates() {
        let engine = RulesEngine::new(Duration::from_millis(50));
        engine.upsert_rule(Rule {
            id: "r1".to_string(),
            priority: 1,
            predicate: Predicate::Not(Box::new(Predicate::Is(Matcher::Model("m1".to_string())))),
            action: Action::Reject("not-m1".to_string()),
        });

        assert_eq!(engine.evaluate(&ctx("m1", None)), Decision::Fallthrough);
        assert!(matches!(engine.evaluate(&ctx("m2", None)), Decision::Matched { .. }));
    }
}
