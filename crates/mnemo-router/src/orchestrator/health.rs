//! Health and metrics reports

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::admission::ConcurrencySnapshot;
use crate::memory::types::{OperationKind, Tier};
use crate::telemetry::{
    AdmissionStats, LatencyPercentiles, OperationStats, RoutingStats, TelemetrySnapshot,
};

/// Utilization at or above which a resource counts as saturated
pub const DEGRADED_UTILIZATION: f64 = 0.9;
/// Fallback rate above which routing counts as unreliable
pub const DEGRADED_FALLBACK_RATE: f64 = 0.25;
/// Fraction of acquisitions that may time out before admission counts as congested
pub const DEGRADED_TIMEOUT_RATE: f64 = 0.10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoringStats {
    pub algorithm: String,
    pub functions: Vec<String>,
    pub decisions: u64,
    pub by_tier: BTreeMap<Tier, u64>,
    pub latency_us: Option<LatencyPercentiles>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IdempotencyReport {
    pub enabled: bool,
    pub entries: usize,
    pub capacity: usize,
    pub ttl_secs: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub state: LifecycleState,
    /// Why the status is not healthy; empty when healthy
    pub reasons: Vec<String>,
    pub concurrency: ConcurrencySnapshot,
    pub scoring: ScoringStats,
    pub idempotency: IdempotencyReport,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub state: LifecycleState,
    pub routing: RoutingStats,
    pub concurrency: ConcurrencySnapshot,
    pub admission: AdmissionStats,
    pub scoring: ScoringStats,
    pub idempotency: IdempotencyReport,
    pub operations: BTreeMap<OperationKind, OperationStats>,
    pub tiers: BTreeMap<Tier, OperationStats>,
}

/// Classify health from lifecycle state, concurrency and telemetry
pub fn assess(
    state: LifecycleState,
    concurrency: &ConcurrencySnapshot,
    telemetry: &TelemetrySnapshot,
) -> (HealthStatus, Vec<String>) {
    if state != LifecycleState::Running {
        let state = match state {
            LifecycleState::Created => "not initialized",
            _ => "shut down",
        };
        return (HealthStatus::Unhealthy, vec![format!("orchestrator is {state}")]);
    }

    let mut reasons = Vec::new();
    for snapshot in concurrency
        .tiers
        .values()
        .chain(concurrency.operations.values())
    {
        if snapshot.utilization >= DEGRADED_UTILIZATION {
            reasons.push(format!(
                "{} utilization at {:.0}%",
                snapshot.name,
                snapshot.utilization * 100.0
            ));
        }
    }
    if telemetry.routing.fallback_rate > DEGRADED_FALLBACK_RATE {
        reasons.push(format!(
            "fallback rate {:.0}% exceeds {:.0}%",
            telemetry.routing.fallback_rate * 100.0,
            DEGRADED_FALLBACK_RATE * 100.0
        ));
    }
    if telemetry.admission.timeout_rate > DEGRADED_TIMEOUT_RATE {
        reasons.push(format!(
            "admission timeouts at {:.0}% of acquisitions",
            telemetry.admission.timeout_rate * 100.0
        ));
    }

    if reasons.is_empty() {
        (HealthStatus::Healthy, reasons)
    } else {
        (HealthStatus::Degraded, reasons)
    }
}
