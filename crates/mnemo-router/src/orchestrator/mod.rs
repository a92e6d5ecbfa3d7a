//! Memory orchestrator
//!
//! The upstream facade over routing, admission, idempotency and telemetry.
//! One instance lives for the whole process: build it from a validated
//! [`Config`], call [`MemoryOrchestrator::initialize`] once, and
//! [`MemoryOrchestrator::shutdown`] before exit.

pub mod health;

pub use health::{
    HealthReport, HealthStatus, IdempotencyReport, LifecycleState, MetricsReport, ScoringStats,
};

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, AdmissionPermit};
use crate::config::Config;
use crate::error::{MnemoError, Result};
use crate::idempotency::{IdempotencyCache, IdempotencyKey, IdempotencyResult};
use crate::memory::types::{
    FallbackStrategy, OperationKind, OperationResult, RoutingContext, RoutingDecision,
    ScoringResult, Tier,
};
use crate::policy::PolicyEvaluator;
use crate::router::Router;
use crate::store::{self, TierStores};
use crate::telemetry::{Telemetry, TelemetrySnapshot};

/// What [`MemoryOrchestrator::execute`] did with a request
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    /// `None` when the result was replayed from the idempotency cache
    pub decision: Option<RoutingDecision>,
    pub result: OperationResult,
    /// Tiers tried, in order; the last one produced `result`
    pub attempted: Vec<Tier>,
    pub replayed: bool,
}

impl Execution {
    /// Tier that produced the result
    pub fn served_by(&self) -> Tier {
        self.result.metadata.tier
    }
}

pub struct MemoryOrchestrator {
    config: Config,
    state: Mutex<LifecycleState>,
    router: Router,
    admission: AdmissionController,
    idempotency: IdempotencyCache<OperationResult>,
    telemetry: Arc<Telemetry>,
}

impl MemoryOrchestrator {
    /// Validate `config` and build every component. The orchestrator starts
    /// in [`LifecycleState::Created`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let telemetry = Arc::new(Telemetry::new(&config.telemetry));
        let router = Router::new(&config, telemetry.clone())?;
        let admission = AdmissionController::new(&config.orchestrator, telemetry.clone());
        let idempotency = IdempotencyCache::new(&config.idempotency);

        Ok(Self {
            config,
            state: Mutex::new(LifecycleState::Created),
            router,
            admission,
            idempotency,
            telemetry,
        })
    }

    /// Replace the policy evaluator, e.g. to append custom rules
    pub fn with_policy(mut self, policy: PolicyEvaluator) -> Self {
        self.router = self.router.with_policy(policy);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Start serving requests. Calling it again while running is a no-op;
    /// a stopped orchestrator cannot be restarted.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            LifecycleState::Running => Ok(()),
            LifecycleState::Stopped => Err(MnemoError::General(
                "orchestrator has been shut down and cannot be restarted".to_string(),
            )),
            LifecycleState::Created => {
                *state = LifecycleState::Running;
                info!(
                    enabled = self.config.orchestrator.enabled,
                    algorithm = self.config.orchestrator.algorithm.as_str(),
                    default_tier = %self.config.orchestrator.default_tier,
                    "Memory orchestrator initialized"
                );
                Ok(())
            }
        }
    }

    /// Stop serving requests: pending admissions fail with `Closed`, the
    /// idempotency cache is dropped and final metrics are logged.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == LifecycleState::Stopped {
                return Ok(());
            }
            *state = LifecycleState::Stopped;
        }

        self.admission.close();
        self.idempotency.clear();

        let snapshot = self.telemetry.snapshot();
        info!(
            decisions = snapshot.routing.total,
            denied = snapshot.routing.denied,
            fallback = snapshot.routing.fallback,
            idempotency_hits = snapshot.idempotency.hits,
            admission_timeouts = snapshot.admission.timeouts,
            "Memory orchestrator shut down"
        );
        match serde_json::to_string(&snapshot) {
            Ok(metrics) => debug!(metrics = %metrics, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to serialize final metrics"),
        }
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Running => Ok(()),
            LifecycleState::Created => Err(MnemoError::General(
                "orchestrator is not initialized".to_string(),
            )),
            LifecycleState::Stopped => {
                Err(MnemoError::General("orchestrator is shut down".to_string()))
            }
        }
    }

    /// Pick the tier that should serve `ctx`. While routing is disabled the
    /// default tier is returned unscored.
    pub async fn route(&self, ctx: &RoutingContext) -> Result<RoutingDecision> {
        self.ensure_running()?;
        if !self.config.orchestrator.enabled {
            return Ok(self.router.bypass_decision(ctx));
        }
        Ok(self.router.route(ctx).await)
    }

    /// Raw per-tier scores, without policy or context augmentation
    pub fn score_tiers(&self, ctx: &RoutingContext) -> Result<Vec<ScoringResult>> {
        self.ensure_running()?;
        self.router.score_tiers(ctx)
    }

    pub async fn acquire_resources(
        &self,
        tier: Tier,
        operation: OperationKind,
    ) -> Result<AdmissionPermit> {
        self.ensure_running()?;
        Ok(self.admission.acquire(tier, operation).await?)
    }

    /// Release is allowed after shutdown so in-flight work can finish cleanly
    pub fn release_resources(&self, permit: &mut AdmissionPermit) -> Result<()> {
        Ok(self.admission.release(permit)?)
    }

    pub fn check_idempotency(
        &self,
        key: &IdempotencyKey,
    ) -> Result<IdempotencyResult<OperationResult>> {
        self.ensure_running()?;
        let result = self.idempotency.check(key);
        if result.hit {
            self.telemetry.record_idempotency_hit();
        } else {
            self.telemetry.record_idempotency_miss();
        }
        Ok(result)
    }

    pub fn store_idempotency_result(
        &self,
        key: IdempotencyKey,
        result: OperationResult,
    ) -> Result<()> {
        self.ensure_running()?;
        let evicted = self.idempotency.store(key, result);
        self.telemetry.record_idempotency_evictions(evicted);
        Ok(())
    }

    /// Route `ctx` and run it against `stores`, falling back through the
    /// decision's fallback plan when a tier cannot serve it.
    ///
    /// Denied operations and admission failures are errors. A store failure
    /// on every candidate tier is not: the last store's result is returned
    /// with its error untouched.
    pub async fn execute(&self, ctx: &RoutingContext, stores: &TierStores) -> Result<Execution> {
        self.ensure_running()?;

        let key = (ctx.operation.is_mutation() && self.idempotency.is_enabled())
            .then(|| IdempotencyKey::from_context(ctx));
        if let Some(key) = &key {
            let cached = self.check_idempotency(key)?;
            if let Some(result) = cached.value {
                debug!(
                    key = %key,
                    operation = %ctx.operation,
                    access_count = cached.access_count,
                    "Replaying cached result"
                );
                return Ok(Execution {
                    decision: None,
                    attempted: Vec::new(),
                    result,
                    replayed: true,
                });
            }
        }

        let decision = self.route(ctx).await?;
        if decision.is_denied() {
            debug!(operation = %ctx.operation, reason = %decision.reasoning, "Rejecting denied operation");
            return Err(MnemoError::Policy(decision.reasoning));
        }
        let Some(primary) = decision.primary_tier else {
            return Err(MnemoError::Routing(
                "decision has no primary tier".to_string(),
            ));
        };

        let advisory = decision
            .final_action
            .is_advisory()
            .then_some(decision.final_action);
        if let Some(action) = advisory {
            warn!(
                action = action.as_str(),
                operation = %ctx.operation,
                tier = %primary,
                "Policy action left to caller"
            );
        }

        let mut candidates = vec![primary];
        if decision.fallback.strategy != FallbackStrategy::None {
            candidates.extend(decision.fallback.tiers.iter().copied());
        }

        let mut attempted = Vec::new();
        let mut last_result = None;
        for tier in candidates {
            let Some(store) = stores.get(&tier) else {
                debug!(tier = %tier, "No store registered for tier, trying next");
                continue;
            };
            if !store.is_healthy().await {
                warn!(tier = %tier, operation = %ctx.operation, "Tier store unhealthy, trying next");
                continue;
            }

            attempted.push(tier);
            let result = self
                .run_on(tier, ctx, store.as_ref())
                .await?
                .with_policy_action(advisory);
            if result.success {
                if let Some(key) = key {
                    self.store_idempotency_result(key, result.clone())?;
                }
                if tier != primary {
                    info!(primary = %primary, served_by = %tier, operation = %ctx.operation, "Served by fallback tier");
                }
                return Ok(Execution {
                    decision: Some(decision),
                    result,
                    attempted,
                    replayed: false,
                });
            }

            warn!(
                tier = %tier,
                operation = %ctx.operation,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Tier store failed"
            );
            last_result = Some(result);
        }

        match last_result {
            Some(result) => Ok(Execution {
                decision: Some(decision),
                result,
                attempted,
                replayed: false,
            }),
            None => Err(MnemoError::Store(format!(
                "no healthy store available for {} (primary tier {primary})",
                ctx.operation
            ))),
        }
    }

    async fn run_on(
        &self,
        tier: Tier,
        ctx: &RoutingContext,
        store: &dyn store::TierStore,
    ) -> Result<OperationResult> {
        let mut permit = self.admission.acquire(tier, ctx.operation).await?;
        let result = store::dispatch(store, ctx).await;
        self.admission.release(&mut permit)?;

        self.telemetry
            .record_operation(tier, ctx.operation, result.metadata.latency_ms, result.success);
        Ok(result)
    }

    fn scoring_stats(&self, telemetry: &TelemetrySnapshot) -> ScoringStats {
        let scorer = self.router.scorer();
        ScoringStats {
            algorithm: scorer.algorithm().as_str().to_string(),
            functions: scorer.function_names(),
            decisions: telemetry.routing.total,
            by_tier: telemetry.routing.by_tier.clone(),
            latency_us: telemetry.routing.latency_us,
        }
    }

    fn idempotency_report(&self, telemetry: &TelemetrySnapshot) -> IdempotencyReport {
        IdempotencyReport {
            enabled: self.idempotency.is_enabled(),
            entries: self.idempotency.len(),
            capacity: self.idempotency.capacity(),
            ttl_secs: self.idempotency.ttl().as_secs(),
            hits: telemetry.idempotency.hits,
            misses: telemetry.idempotency.misses,
            evictions: telemetry.idempotency.evictions,
            hit_rate: telemetry.idempotency.hit_rate,
        }
    }

    /// Available in every lifecycle state
    pub fn get_health(&self) -> HealthReport {
        let state = self.state();
        let telemetry = self.telemetry.snapshot();
        let concurrency = self.admission.snapshot();
        let (status, reasons) = health::assess(state, &concurrency, &telemetry);

        HealthReport {
            status,
            state,
            reasons,
            scoring: self.scoring_stats(&telemetry),
            idempotency: self.idempotency_report(&telemetry),
            concurrency,
            checked_at: Utc::now(),
        }
    }

    pub fn get_metrics(&self) -> MetricsReport {
        let telemetry = self.telemetry.snapshot();
        MetricsReport {
            state: self.state(),
            scoring: self.scoring_stats(&telemetry),
            idempotency: self.idempotency_report(&telemetry),
            concurrency: self.admission.snapshot(),
            routing: telemetry.routing,
            admission: telemetry.admission,
            operations: telemetry.operations,
            tiers: telemetry.tiers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryTierStore;
    use crate::testing::{in_memory_stores, running_orchestrator};

    mod lifecycle {
        use super::*;

        #[tokio::test]
        async fn test_operations_require_initialize() {
            let orchestrator = MemoryOrchestrator::new(Config::default()).unwrap();
            assert_eq!(orchestrator.state(), LifecycleState::Created);

            let err = orchestrator
                .route(&RoutingContext::new(OperationKind::Search))
                .await
                .unwrap_err();
            assert!(matches!(err, MnemoError::General(_)));
        }

        #[test]
        fn test_initialize_and_shutdown_are_idempotent() {
            let orchestrator = MemoryOrchestrator::new(Config::default()).unwrap();
            orchestrator.initialize().unwrap();
            orchestrator.initialize().unwrap();
            assert!(orchestrator.is_running());

            orchestrator.shutdown().unwrap();
            orchestrator.shutdown().unwrap();
            assert_eq!(orchestrator.state(), LifecycleState::Stopped);
            assert!(orchestrator.initialize().is_err());
        }

        #[tokio::test]
        async fn test_shutdown_rejects_new_work() {
            let orchestrator = running_orchestrator(Config::default());
            orchestrator.shutdown().unwrap();

            let err = orchestrator
                .acquire_resources(Tier::Working, OperationKind::Store)
                .await
                .unwrap_err();
            assert!(matches!(err, MnemoError::General(_)));
        }

        #[test]
        fn test_invalid_config_rejected() {
            let mut config = Config::default();
            config.orchestrator.acquire_timeout_ms = 0;
            assert!(matches!(
                MemoryOrchestrator::new(config),
                Err(MnemoError::Config(_))
            ));
        }
    }

    mod execute {
        use super::*;

        #[tokio::test]
        async fn test_store_then_retrieve() {
            let orchestrator = running_orchestrator(Config::default());
            let stores = in_memory_stores();

            let stored = orchestrator
                .execute(
                    &RoutingContext::new(OperationKind::Store)
                        .with_key("note-1")
                        .with_content("buy milk"),
                    &stores,
                )
                .await
                .unwrap();
            assert!(stored.result.success);
            assert_eq!(stored.served_by(), Tier::Working);

            let read = orchestrator
                .execute(
                    &RoutingContext::new(OperationKind::Retrieve)
                        .with_key("note-1")
                        .with_preferred_tier(Tier::Working),
                    &stores,
                )
                .await
                .unwrap();
            assert!(read.result.success);
        }

        #[tokio::test]
        async fn test_repeated_mutation_is_replayed() {
            let orchestrator = running_orchestrator(Config::default());
            let stores = in_memory_stores();
            let ctx = RoutingContext::new(OperationKind::Store)
                .with_key("k")
                .with_content("once");

            let first = orchestrator.execute(&ctx, &stores).await.unwrap();
            let second = orchestrator.execute(&ctx, &stores).await.unwrap();
            assert!(!first.replayed);
            assert!(second.replayed);
            assert!(second.decision.is_none());
            assert_eq!(second.result, first.result);

            let metrics = orchestrator.get_metrics();
            assert_eq!(metrics.idempotency.hits, 1);
            assert_eq!(metrics.idempotency.misses, 1);
            assert_eq!(metrics.routing.total, 1);
        }

        #[tokio::test]
        async fn test_reads_are_not_cached() {
            let orchestrator = running_orchestrator(Config::default());
            let stores = in_memory_stores();
            let ctx = RoutingContext::new(OperationKind::Search).with_content("milk");

            orchestrator.execute(&ctx, &stores).await.unwrap();
            let second = orchestrator.execute(&ctx, &stores).await.unwrap();
            assert!(!second.replayed);
            assert_eq!(orchestrator.get_metrics().idempotency.misses, 0);
        }

        #[tokio::test]
        async fn test_missing_primary_store_uses_fallback() {
            let orchestrator = running_orchestrator(Config::default());
            let mut stores = in_memory_stores();
            stores.remove(&Tier::Semantic);

            let execution = orchestrator
                .execute(
                    &RoutingContext::new(OperationKind::Search).with_content("anything"),
                    &stores,
                )
                .await
                .unwrap();
            let decision = execution.decision.as_ref().unwrap();
            assert_eq!(decision.primary_tier, Some(Tier::Semantic));
            assert!(execution.result.success);
            assert_eq!(Some(&execution.served_by()), decision.fallback.tiers.first());
        }

        #[tokio::test]
        async fn test_unhealthy_primary_store_uses_fallback() {
            let orchestrator = running_orchestrator(Config::default());
            let mut stores = in_memory_stores();
            let semantic = Arc::new(InMemoryTierStore::new(Tier::Semantic));
            semantic.set_healthy(false);
            stores.insert(Tier::Semantic, semantic);

            let execution = orchestrator
                .execute(
                    &RoutingContext::new(OperationKind::Search).with_content("anything"),
                    &stores,
                )
                .await
                .unwrap();
            assert_ne!(execution.served_by(), Tier::Semantic);
            assert!(!execution.attempted.contains(&Tier::Semantic));
        }

        #[tokio::test]
        async fn test_no_store_at_all_is_an_error() {
            let orchestrator = running_orchestrator(Config::default());
            let err = orchestrator
                .execute(&RoutingContext::new(OperationKind::Stats), &TierStores::new())
                .await
                .unwrap_err();
            assert!(matches!(err, MnemoError::Store(_)));
        }

        #[tokio::test]
        async fn test_denied_operation_is_rejected() {
            let mut config = Config::default();
            config.policy.access.enabled = true;
            config.policy.access.require_auth = true;
            let orchestrator = running_orchestrator(config);

            let err = orchestrator
                .execute(&RoutingContext::new(OperationKind::Search), &in_memory_stores())
                .await
                .unwrap_err();
            match err {
                MnemoError::Policy(reason) => assert!(reason.contains("authentication required")),
                other => panic!("expected policy error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_permits_are_returned() {
            let orchestrator = running_orchestrator(Config::default());
            let stores = in_memory_stores();
            orchestrator
                .execute(
                    &RoutingContext::new(OperationKind::Store).with_content("x"),
                    &stores,
                )
                .await
                .unwrap();

            let concurrency = orchestrator.get_metrics().concurrency;
            for snapshot in concurrency.tiers.values() {
                assert_eq!(snapshot.available, snapshot.total);
            }
        }
    }

    mod reporting {
        use super::*;

        #[test]
        fn test_health_tracks_lifecycle() {
            let orchestrator = MemoryOrchestrator::new(Config::default()).unwrap();
            assert_eq!(orchestrator.get_health().status, HealthStatus::Unhealthy);

            orchestrator.initialize().unwrap();
            let health = orchestrator.get_health();
            assert_eq!(health.status, HealthStatus::Healthy);
            assert_eq!(health.scoring.algorithm, "weighted");
            assert_eq!(health.scoring.functions, vec!["heuristic".to_string()]);
            assert!(health.idempotency.enabled);

            orchestrator.shutdown().unwrap();
            assert_eq!(orchestrator.get_health().status, HealthStatus::Unhealthy);
        }

        #[tokio::test]
        async fn test_bypass_when_disabled() {
            let mut config = Config::default();
            config.orchestrator.enabled = false;
            config.orchestrator.default_tier = Tier::Episodic;
            let orchestrator = running_orchestrator(config);

            let decision = orchestrator
                .route(&RoutingContext::new(OperationKind::Search).with_content("x"))
                .await
                .unwrap();
            assert_eq!(decision.primary_tier, Some(Tier::Episodic));
            assert_eq!(orchestrator.get_metrics().routing.bypassed, 1);
        }

        #[tokio::test]
        async fn test_idempotency_api_records_telemetry() {
            let orchestrator = running_orchestrator(Config::default());
            let key = IdempotencyKey::new("manual");

            assert!(!orchestrator.check_idempotency(&key).unwrap().hit);
            orchestrator
                .store_idempotency_result(
                    key.clone(),
                    OperationResult::ok(Tier::Working, OperationKind::Store, None),
                )
                .unwrap();
            assert!(orchestrator.check_idempotency(&key).unwrap().hit);

            let report = orchestrator.get_health().idempotency;
            assert_eq!((report.hits, report.misses, report.entries), (1, 1, 1));
        }
    }
}
