//! # Metrics Fabric
//!
//! Process-wide request counters, cost/token tallies, and a merged latency
//! histogram (spec §4.11). Complements the per-candidate gauges already
//! exposed by [`crate::registry::ProviderRegistry::snapshot_health`]
//! (active connections, circuit state, error rate, per-candidate latency
//! quantiles) and [`crate::coordinator::Coordinator`]'s bulkhead/retry-budget
//! accessors with the aggregate, cross-candidate view: total throughput,
//! per-provider and per-model breakdowns, and a Prometheus text export.
//!
//! Every counter is a relaxed atomic; nothing here takes a lock on the
//! request path. Latency is recorded into a per-thread histogram shard (one
//! `Mutex<Histogram>` per `ThreadId`, contended only by its own thread) and
//! periodically folded into a global histogram under a short-lived lock by
//! [`MetricsFabric::merge_latency_shards`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;
use std::time::Instant;

use dashmap::DashMap;
use hdrhistogram::Histogram;

/// Lock-free request/cost/token counters for one provider or model.
#[derive(Default)]
struct Counters {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    /// USD, fixed-point in micro-dollars so the running total stays integral.
    cost_micros: AtomicU64,
}

impl Counters {
    fn record(&self, success: bool, input_tokens: u64, output_tokens: u64, cost_usd: f64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        self.input_tokens.fetch_add(input_tokens, Ordering::Relaxed);
        self.output_tokens.fetch_add(output_tokens, Ordering::Relaxed);
        self.cost_micros
            .fetch_add((cost_usd * 1_000_000.0).max(0.0) as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            input_tokens: self.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.output_tokens.load(Ordering::Relaxed),
            cost_usd: self.cost_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Point-in-time read of one provider's or model's [`Counters`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

impl CounterSnapshot {
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.failures as f64 / self.requests as f64
        }
    }
}

/// Per-thread latency shard: only the owning thread ever locks it, so
/// contention is effectively zero.
struct LatencyShards {
    shards: DashMap<ThreadId, Mutex<Histogram<u64>>>,
    merged: Mutex<Histogram<u64>>,
}

impl LatencyShards {
    fn new() -> Self {
        Self {
            shards: DashMap::new(),
            merged: Mutex::new(
                Histogram::new_with_bounds(1, 60_000, 3).expect("valid histogram bounds"),
            ),
        }
    }

    fn record(&self, latency_ms: u64) {
        let thread_id = std::thread::current().id();
        let shard = self
            .shards
            .entry(thread_id)
            .or_insert_with(|| {
                Mutex::new(Histogram::new_with_bounds(1, 60_000, 3).expect("valid histogram bounds"))
            });
        if let Ok(mut hist) = shard.lock() {
            let _ = hist.record(latency_ms.max(1));
        }
    }

    /// Drain every thread's shard into the merged histogram. Each shard is
    /// locked only for the duration of the drain, never for the merge
    /// itself; the merged histogram's own lock is the "short writer lock"
    /// spec §4.11 describes.
    fn merge(&self) {
        for shard in self.shards.iter() {
            let drained = {
                let mut hist = match shard.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let snapshot = hist.clone();
                hist.reset();
                snapshot
            };
            if let Ok(mut merged) = self.merged.lock() {
                let _ = merged.add(drained);
            }
        }
    }

    fn quantile_ms(&self, quantile: f64) -> Option<u64> {
        let hist = self.merged.lock().ok()?;
        if hist.len() == 0 {
            None
        } else {
            Some(hist.value_at_quantile(quantile))
        }
    }

    fn sample_count(&self) -> u64 {
        self.merged.lock().map(|h| h.len()).unwrap_or(0)
    }
}

/// Aggregate, cross-candidate view of request volume, latency, and cost
/// (spec §4.11). One instance typically serves an entire process.
pub struct MetricsFabric {
    total: Counters,
    by_provider: DashMap<String, Counters>,
    by_model: DashMap<String, Counters>,
    latency: LatencyShards,
    started_at: Instant,
}

impl Default for MetricsFabric {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsFabric {
    pub fn new() -> Self {
        Self {
            total: Counters::default(),
            by_provider: DashMap::new(),
            by_model: DashMap::new(),
            latency: LatencyShards::new(),
            started_at: Instant::now(),
        }
    }

    /// Record one completed request's outcome. Cheap enough to call from the
    /// Coordinator's hot path: a handful of relaxed atomic adds plus one
    /// uncontended per-thread histogram write.
    pub fn record_request(
        &self,
        provider_id: &str,
        model: &str,
        success: bool,
        latency_ms: u64,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) {
        self.total
            .record(success, input_tokens, output_tokens, cost_usd);
        self.by_provider
            .entry(provider_id.to_string())
            .or_default()
            .record(success, input_tokens, output_tokens, cost_usd);
        self.by_model
            .entry(model.to_string())
            .or_default()
            .record(success, input_tokens, output_tokens, cost_usd);
        self.latency.record(latency_ms);
    }

    /// Fold every thread's latency shard into the merged histogram. Call
    /// periodically (e.g. every second) from a background tick; never on
    /// the request path.
    pub fn merge_latency_shards(&self) {
        self.latency.merge();
    }

    pub fn snapshot(&self) -> FabricSnapshot {
        FabricSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            total: self.total.snapshot(),
            p50_latency_ms: self.latency.quantile_ms(50.0),
            p95_latency_ms: self.latency.quantile_ms(95.0),
            p99_latency_ms: self.latency.quantile_ms(99.0),
            latency_samples: self.latency.sample_count(),
            by_provider: self
                .by_provider
                .iter()
                .map(|e| (e.key().clone(), e.value().snapshot()))
                .collect(),
            by_model: self
                .by_model
                .iter()
                .map(|e| (e.key().clone(), e.value().snapshot()))
                .collect(),
        }
    }

    /// Render the current snapshot as Prometheus text-format metrics.
    pub fn export_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        out.push_str("# HELP gateway_requests_total Total requests processed\n");
        out.push_str("# TYPE gateway_requests_total counter\n");
        out.push_str(&format!("gateway_requests_total {}\n", snapshot.total.requests));

        out.push_str("# HELP gateway_requests_failed_total Failed requests\n");
        out.push_str("# TYPE gateway_requests_failed_total counter\n");
        out.push_str(&format!(
            "gateway_requests_failed_total {}\n",
            snapshot.total.failures
        ));

        out.push_str("# HELP gateway_error_rate Overall error rate\n");
        out.push_str("# TYPE gateway_error_rate gauge\n");
        out.push_str(&format!("gateway_error_rate {}\n", snapshot.total.error_rate()));

        out.push_str("# HELP gateway_cost_usd_total Total estimated cost in USD\n");
        out.push_str("# TYPE gateway_cost_usd_total counter\n");
        out.push_str(&format!("gateway_cost_usd_total {}\n", snapshot.total.cost_usd));

        if let Some(p50) = snapshot.p50_latency_ms {
            out.push_str(&format!("gateway_latency_ms{{quantile=\"0.5\"}} {p50}\n"));
        }
        if let Some(p95) = snapshot.p95_latency_ms {
            out.push_str(&format!("gateway_latency_ms{{quantile=\"0.95\"}} {p95}\n"));
        }
        if let Some(p99) = snapshot.p99_latency_ms {
            out.push_str(&format!("gateway_latency_ms{{quantile=\"0.99\"}} {p99}\n"));
        }

        for entry in snapshot.by_provider.iter() {
            let (provider_id, counters) = entry;
            out.push_str(&format!(
                "gateway_provider_requests_total{{provider=\"{provider_id}\"}} {}\n",
                counters.requests
            ));
            out.push_str(&format!(
                "gateway_provider_error_rate{{provider=\"{provider_id}\"}} {}\n",
                counters.error_rate()
            ));
            out.push_str(&format!(
                "gateway_provider_cost_usd_total{{provider=\"{provider_id}\"}} {}\n",
                counters.cost_usd
            ));
        }

        for entry in snapshot.by_model.iter() {
            let (model, counters) = entry;
            out.push_str(&format!(
                "gateway_model_requests_total{{model=\"{model}\"}} {}\n",
                counters.requests
            ));
            out.push_str(&format!(
                "gateway_model_tokens_total{{model=\"{model}\"}} {}\n",
                counters.input_tokens + counters.output_tokens
            ));
        }

        out
    }
}

/// A point-in-time read of the whole fabric, used by [`MetricsFabric::export_prometheus`]
/// and available directly for a JSON metrics endpoint.
#[derive(Debug, Clone)]
pub struct FabricSnapshot {
    pub uptime_seconds: u64,
    pub total: CounterSnapshot,
    pub p50_latency_ms: Option<u64>,
    pub p95_latency_ms: Option<u64>,
    pub p99_latency_ms: Option<u64>,
    pub latency_samples: u64,
    pub by_provider: HashMap<String, CounterSnapshot>,
    pub by_model: HashMap<String, CounterSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_snapshots_total_counters() {
        let fabric = MetricsFabric::new();
        fabric.record_request("p1", "m1", true, 50, 100, 20, 0.002);
        fabric.record_request("p1", "m1", false, 80, 50, 0, 0.001);

        let snapshot = fabric.snapshot();
        assert_eq!(snapshot.total.requests, 2);
        assert_eq!(snapshot.total.successes, 1);
        assert_eq!(snapshot.total.failures, 1);
        assert!((snapshot.total.cost_usd - 0.003).abs() < 1e-9);
    }

    #[test]
    fn splits_counters_by_provider_and_model() {
        let fabric = MetricsFabric::new();
        fabric.record_request("p1", "m1", true, 10, 1, 1, 0.0);
        fabric.record_request("p2", "m2", true, 10, 1, 1, 0.0);

        let snapshot = fabric.snapshot();
        assert_eq!(snapshot.by_provider.get("p1").unwrap().requests, 1);
        assert_eq!(snapshot.by_provider.get("p2").unwrap().requests, 1);
        assert_eq!(snapshot.by_model.get("m1").unwrap().requests, 1);
        assert_eq!(snapshot.by_model.get("m2").unwrap().requests, 1);
    }

    #[test]
    fn latency_merge_populates_quantiles() {
        let fabric = MetricsFabric::new();
        for latency in [10, 20, 30, 40, 50] {
            fabric.record_request("p1", "m1", true, latency, 0, 0, 0.0);
        }
        fabric.merge_latency_shards();

        let snapshot = fabric.snapshot();
        assert_eq!(snapshot.latency_samples, 5);
        assert!(snapshot.p50_latency_ms.is_some());
    }

    #[test]
    fn prometheus_export_contains_core_lines() {
        let fabric = MetricsFabric::new();
        fabric.record_request("openai", "gpt-4", true, 100, 10, 5, 0.01);
        fabric.merge_latency_shards();

        let text = fabric.export_prometheus();
        assert!(text.contains("gateway_requests_total 1"));
        assert!(text.contains("gateway_provider_requests_total{provider=\"openai\"} 1"));
        assert!(text.contains("gateway_model_requests_total{model=\"gpt-4\"} 1"));
    }

    #[test]
    fn error_rate_is_zero_with_no_requests() {
        let counters = CounterSnapshot::default();
        assert_eq!(counters.error_rate(), 0.0);
    }
}
