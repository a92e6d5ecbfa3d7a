//! Routing telemetry
//!
//! Counters are exact. Latency samples go into bounded windows and are
//! subject to the configured sample rate, taking every Nth observation
//! where N = round(1 / rate).

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::TelemetryConfig;
use crate::memory::types::{DecisionStatus, OperationKind, RoutingDecision, Tier};

/// Nearest-rank percentiles over a latency window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub samples: usize,
}

/// Bounded ring of the most recent latency samples
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    capacity: usize,
    samples: VecDeque<f64>,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn record(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn percentiles(&self) -> Option<LatencyPercentiles> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);

        let rank = |p: f64| {
            let idx = (p * sorted.len() as f64).ceil() as usize;
            sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
        };
        Some(LatencyPercentiles {
            p50: rank(0.50),
            p95: rank(0.95),
            p99: rank(0.99),
            samples: sorted.len(),
        })
    }
}

#[derive(Debug, Default)]
struct OperationCounters {
    total: u64,
    failures: u64,
}

impl OperationCounters {
    fn count(&mut self, success: bool) {
        self.total += 1;
        if !success {
            self.failures += 1;
        }
    }
}

/// Routing outcome counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RoutingStats {
    pub total: u64,
    pub decided: u64,
    pub denied: u64,
    pub fallback: u64,
    pub bypassed: u64,
    pub fallback_rate: f64,
    pub by_tier: BTreeMap<Tier, u64>,
    /// Routing call duration in microseconds
    pub latency_us: Option<LatencyPercentiles>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationStats {
    pub total: u64,
    pub failures: u64,
    pub latency_ms: Option<LatencyPercentiles>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IdempotencyStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AdmissionStats {
    pub acquired: u64,
    pub timeouts: u64,
    pub rejected: u64,
    /// Timeouts as a fraction of acquisition attempts
    pub timeout_rate: f64,
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetrySnapshot {
    pub routing: RoutingStats,
    pub operations: BTreeMap<OperationKind, OperationStats>,
    pub tiers: BTreeMap<Tier, OperationStats>,
    pub idempotency: IdempotencyStats,
    pub admission: AdmissionStats,
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Shared telemetry sink, passed to components as `Arc<Telemetry>`
#[derive(Debug)]
pub struct Telemetry {
    /// 0 disables latency sampling
    sample_every: u64,
    window: usize,
    routing_observations: AtomicU64,
    operation_observations: AtomicU64,

    decided: AtomicU64,
    denied: AtomicU64,
    fallback: AtomicU64,
    bypassed: AtomicU64,
    tier_decisions: DashMap<Tier, u64>,
    routing_latency: Mutex<LatencyWindow>,

    operations: DashMap<OperationKind, OperationCounters>,
    tier_operations: DashMap<Tier, OperationCounters>,
    operation_latency: DashMap<OperationKind, LatencyWindow>,
    tier_latency: DashMap<Tier, LatencyWindow>,

    idempotency_hits: AtomicU64,
    idempotency_misses: AtomicU64,
    idempotency_evictions: AtomicU64,

    admission_acquired: AtomicU64,
    admission_timeouts: AtomicU64,
    admission_rejected: AtomicU64,
}

impl Telemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        let sample_every = if config.sample_rate <= 0.0 {
            0
        } else {
            (1.0 / config.sample_rate as f64).round().max(1.0) as u64
        };

        Self {
            sample_every,
            window: config.latency_window,
            routing_observations: AtomicU64::new(0),
            operation_observations: AtomicU64::new(0),
            decided: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            fallback: AtomicU64::new(0),
            bypassed: AtomicU64::new(0),
            tier_decisions: DashMap::new(),
            routing_latency: Mutex::new(LatencyWindow::new(config.latency_window)),
            operations: DashMap::new(),
            tier_operations: DashMap::new(),
            operation_latency: DashMap::new(),
            tier_latency: DashMap::new(),
            idempotency_hits: AtomicU64::new(0),
            idempotency_misses: AtomicU64::new(0),
            idempotency_evictions: AtomicU64::new(0),
            admission_acquired: AtomicU64::new(0),
            admission_timeouts: AtomicU64::new(0),
            admission_rejected: AtomicU64::new(0),
        }
    }

    /// Every-Nth sampling, counted per stream
    fn should_sample(&self, observations: &AtomicU64) -> bool {
        if self.sample_every == 0 {
            return false;
        }
        observations.fetch_add(1, Ordering::Relaxed) % self.sample_every == 0
    }

    /// Count a routing decision by outcome and tier, and sample its duration
    pub fn record_decision(&self, decision: &RoutingDecision) {
        let counter = match decision.status {
            DecisionStatus::Decided => &self.decided,
            DecisionStatus::Denied => &self.denied,
            DecisionStatus::Fallback => &self.fallback,
            DecisionStatus::Bypassed => &self.bypassed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if let Some(tier) = decision.primary_tier {
            *self.tier_decisions.entry(tier).or_insert(0) += 1;
        }

        if self.should_sample(&self.routing_observations) {
            if let Ok(mut window) = self.routing_latency.lock() {
                window.record(decision.metadata.duration_us as f64);
            }
        }
    }

    /// Count an executed tier-store operation and sample its latency
    pub fn record_operation(
        &self,
        tier: Tier,
        operation: OperationKind,
        latency_ms: f64,
        success: bool,
    ) {
        self.operations.entry(operation).or_default().count(success);
        self.tier_operations.entry(tier).or_default().count(success);

        if self.should_sample(&self.operation_observations) {
            self.operation_latency
                .entry(operation)
                .or_insert_with(|| LatencyWindow::new(self.window))
                .record(latency_ms);
            self.tier_latency
                .entry(tier)
                .or_insert_with(|| LatencyWindow::new(self.window))
                .record(latency_ms);
        }
    }

    pub fn record_idempotency_hit(&self) {
        self.idempotency_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idempotency_miss(&self) {
        self.idempotency_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_idempotency_evictions(&self, count: usize) {
        self.idempotency_evictions
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_admission_acquired(&self) {
        self.admission_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission_timeout(&self) {
        self.admission_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Acquisition failed for a reason other than a timeout
    pub fn record_admission_rejected(&self) {
        self.admission_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Observed median operation latency on a tier, if any samples exist
    pub fn tier_latency_p50(&self, tier: Tier) -> Option<f64> {
        self.tier_latency
            .get(&tier)
            .and_then(|w| w.percentiles())
            .map(|p| p.p50)
    }

    /// Fallback decisions as a fraction of all routing decisions
    pub fn fallback_rate(&self) -> f64 {
        let fallback = self.fallback.load(Ordering::Relaxed);
        ratio(fallback, self.total_decisions())
    }

    /// Admission timeouts as a fraction of acquisition attempts
    pub fn admission_timeout_rate(&self) -> f64 {
        let timeouts = self.admission_timeouts.load(Ordering::Relaxed);
        let attempts = self.admission_acquired.load(Ordering::Relaxed)
            + timeouts
            + self.admission_rejected.load(Ordering::Relaxed);
        ratio(timeouts, attempts)
    }

    fn total_decisions(&self) -> u64 {
        self.decided.load(Ordering::Relaxed)
            + self.denied.load(Ordering::Relaxed)
            + self.fallback.load(Ordering::Relaxed)
            + self.bypassed.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let routing = RoutingStats {
            total: self.total_decisions(),
            decided: self.decided.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            fallback: self.fallback.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            fallback_rate: self.fallback_rate(),
            by_tier: self
                .tier_decisions
                .iter()
                .map(|e| (*e.key(), *e.value()))
                .collect(),
            latency_us: self
                .routing_latency
                .lock()
                .ok()
                .and_then(|w| w.percentiles()),
        };

        let operations = self
            .operations
            .iter()
            .map(|e| {
                let latency = self
                    .operation_latency
                    .get(e.key())
                    .and_then(|w| w.percentiles());
                (
                    *e.key(),
                    OperationStats {
                        total: e.total,
                        failures: e.failures,
                        latency_ms: latency,
                    },
                )
            })
            .collect();

        let tiers = self
            .tier_operations
            .iter()
            .map(|e| {
                let latency = self.tier_latency.get(e.key()).and_then(|w| w.percentiles());
                (
                    *e.key(),
                    OperationStats {
                        total: e.total,
                        failures: e.failures,
                        latency_ms: latency,
                    },
                )
            })
            .collect();

        let hits = self.idempotency_hits.load(Ordering::Relaxed);
        let misses = self.idempotency_misses.load(Ordering::Relaxed);
        let idempotency = IdempotencyStats {
            hits,
            misses,
            evictions: self.idempotency_evictions.load(Ordering::Relaxed),
            hit_rate: ratio(hits, hits + misses),
        };

        let admission = AdmissionStats {
            acquired: self.admission_acquired.load(Ordering::Relaxed),
            timeouts: self.admission_timeouts.load(Ordering::Relaxed),
            rejected: self.admission_rejected.load(Ordering::Relaxed),
            timeout_rate: self.admission_timeout_rate(),
        };

        TelemetrySnapshot {
            routing,
            operations,
            tiers,
            idempotency,
            admission,
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new(&TelemetryConfig::default())
    }
}
