//! Routing decision engine
//!
//! Per call: analyze (when enabled) -> evaluate policy for every tier ->
//! deny when no tier is allowed -> score -> augment -> select the best
//! tier. Internal failures never reach the caller; they produce a
//! low-confidence fallback decision on the default tier.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::ContextAnalyzer;
use crate::config::{Config, OrchestratorConfig};
use crate::error::{MnemoError, Result};
use crate::memory::types::{
    DecisionMetadata, DecisionStatus, FallbackPlan, FallbackStrategy, RoutingContext,
    RoutingDecision, ScoringResult, Tier,
};
use crate::policy::{PolicyAction, PolicyEvaluator, PolicyOutcome, PolicyRequest};
use crate::scoring::{ScoreAugmenter, TierProfile, TierScorer};
use crate::telemetry::Telemetry;

/// Confidence reported on fallback and bypass decisions
pub const FALLBACK_CONFIDENCE: f32 = 0.1;

pub struct Router {
    config: OrchestratorConfig,
    analyzer: ContextAnalyzer,
    policy: PolicyEvaluator,
    scorer: TierScorer,
    augmenter: ScoreAugmenter,
    profile: TierProfile,
    telemetry: Arc<Telemetry>,
}

impl Router {
    pub fn new(config: &Config, telemetry: Arc<Telemetry>) -> Result<Self> {
        Ok(Self {
            config: config.orchestrator.clone(),
            analyzer: ContextAnalyzer::new(config.analysis.clone()),
            policy: PolicyEvaluator::new(&config.policy)?,
            scorer: TierScorer::from_config(&config.orchestrator)?,
            augmenter: ScoreAugmenter::new(),
            profile: TierProfile::from_scoring(&config.orchestrator.scoring),
            telemetry,
        })
    }

    /// Replace the policy evaluator, e.g. to add custom rules
    pub fn with_policy(mut self, policy: PolicyEvaluator) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the tier scorer
    pub fn with_scorer(mut self, scorer: TierScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn scorer(&self) -> &TierScorer {
        &self.scorer
    }

    pub fn score_tiers(&self, ctx: &RoutingContext) -> Result<Vec<ScoringResult>> {
        self.scorer.score_tiers(ctx)
    }

    /// Route `ctx`. Never fails; internal errors become a fallback decision.
    pub async fn route(&self, ctx: &RoutingContext) -> RoutingDecision {
        let started = Instant::now();
        let decision = match self.try_route(ctx, started).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(operation = %ctx.operation, error = %e, "Routing failed, using fallback tier");
                self.fallback_decision(ctx, &e.to_string(), started)
            }
        };

        self.telemetry.record_decision(&decision);
        decision
    }

    async fn try_route(&self, ctx: &RoutingContext, started: Instant) -> Result<RoutingDecision> {
        let mut ctx = ctx.clone();
        if self.analyzer.is_enabled() && ctx.analysis.is_none() {
            ctx.analysis = Some(self.analyzer.analyze(ctx.operation, ctx.content.as_deref()));
        }

        let outcomes: Vec<(Tier, PolicyOutcome)> = join_all(Tier::ALL.iter().map(|&tier| {
            let ctx = &ctx;
            async move {
                let outcome = self.policy.evaluate(&PolicyRequest::from_context(ctx, tier)).await;
                (tier, outcome)
            }
        }))
        .await;

        if outcomes.iter().all(|(_, o)| o.is_denied()) {
            let (_, outcome) = outcomes
                .into_iter()
                .next()
                .ok_or_else(|| MnemoError::Routing("no policy outcomes".to_string()))?;
            return Ok(self.denied_decision(&ctx, outcome, started));
        }

        let mut candidates = Vec::new();
        for (tier, outcome) in &outcomes {
            if outcome.is_denied() {
                debug!(tier = %tier, reason = outcome.final_reason(), "Tier excluded by policy");
                continue;
            }
            let raw = self.scorer.score_tier(&ctx, *tier)?;
            let augmented =
                self.augmenter
                    .augment_one(raw, &outcome.decisions, ctx.analysis.as_ref());
            if augmented.score.is_nan() {
                return Err(MnemoError::Routing(format!("NaN score for tier {tier}")));
            }
            candidates.push(augmented);
        }

        let ranked = rank(candidates);
        let Some((winner, runners_up)) = ranked.split_first() else {
            return Err(MnemoError::Routing("no candidate tiers".to_string()));
        };

        let outcome = outcomes
            .iter()
            .find(|(tier, _)| *tier == winner.tier)
            .map(|(_, o)| o.clone())
            .unwrap_or_else(|| PolicyOutcome::from_decisions(Vec::new()));

        let fallback = self.fallback_plan(winner.confidence, runners_up);
        let mut reasoning = winner.reasoning.clone();
        reasoning.push(format!(
            "selected {} with score {:.2} (confidence {:.2})",
            winner.tier, winner.score, winner.confidence
        ));

        let decision = RoutingDecision {
            status: DecisionStatus::Decided,
            primary_tier: Some(winner.tier),
            fallback,
            reasoning: reasoning.join("; "),
            confidence: winner.confidence,
            estimated_latency_ms: self.estimated_latency_ms(winner.tier),
            features: winner.features.clone(),
            final_action: outcome.final_action,
            policy_decisions: outcome.decisions,
            metadata: self.metadata(&ctx, started),
        };

        info!(
            operation = %ctx.operation,
            tier = %winner.tier,
            score = winner.score,
            confidence = winner.confidence,
            final_action = decision.final_action.as_str(),
            "Routing decision"
        );
        Ok(decision)
    }

    /// Runner-ups the caller may try if the primary tier fails
    fn fallback_plan(&self, confidence: f32, runners_up: &[ScoringResult]) -> FallbackPlan {
        let all: Vec<Tier> = runners_up.iter().map(|r| r.tier).collect();
        let best: Vec<Tier> = all.iter().take(1).copied().collect();

        let (strategy, tiers) = match self.config.fallback_strategy {
            FallbackStrategy::None => (FallbackStrategy::None, Vec::new()),
            FallbackStrategy::SingleTier => (FallbackStrategy::SingleTier, best),
            FallbackStrategy::Cascade => (FallbackStrategy::Cascade, all),
            FallbackStrategy::Parallel => (FallbackStrategy::Parallel, all),
            FallbackStrategy::Intelligent => {
                if confidence < self.config.confidence_threshold {
                    (FallbackStrategy::Cascade, all)
                } else {
                    (FallbackStrategy::SingleTier, best)
                }
            }
        };
        FallbackPlan { strategy, tiers }
    }

    fn estimated_latency_ms(&self, tier: Tier) -> f64 {
        self.telemetry
            .tier_latency_p50(tier)
            .unwrap_or_else(|| self.profile.expected_latency_ms(tier))
    }

    fn metadata(&self, ctx: &RoutingContext, started: Instant) -> DecisionMetadata {
        DecisionMetadata {
            algorithm: self.scorer.algorithm().as_str().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            correlation_id: Uuid::new_v4(),
            request_id: ctx.metadata.request_id.clone(),
            session_id: ctx.metadata.session_id.clone(),
            decided_at: Utc::now(),
            duration_us: started.elapsed().as_micros() as u64,
        }
    }

    fn denied_decision(
        &self,
        ctx: &RoutingContext,
        outcome: PolicyOutcome,
        started: Instant,
    ) -> RoutingDecision {
        let reason = outcome
            .final_reason()
            .unwrap_or("denied by policy")
            .to_string();
        warn!(operation = %ctx.operation, reason = %reason, "Operation denied by policy");

        RoutingDecision {
            status: DecisionStatus::Denied,
            primary_tier: None,
            fallback: FallbackPlan::none(),
            reasoning: format!("denied: {reason}"),
            confidence: 1.0,
            estimated_latency_ms: 0.0,
            features: Vec::new(),
            final_action: PolicyAction::Deny,
            policy_decisions: outcome.decisions,
            metadata: self.metadata(ctx, started),
        }
    }

    /// Default tier at fallback confidence
    pub fn fallback_decision(
        &self,
        ctx: &RoutingContext,
        reason: &str,
        started: Instant,
    ) -> RoutingDecision {
        self.default_tier_decision(ctx, DecisionStatus::Fallback, format!("fallback: {reason}"), started)
    }

    /// Unscored decision used while routing is disabled
    pub fn bypass_decision(&self, ctx: &RoutingContext) -> RoutingDecision {
        let decision = self.default_tier_decision(
            ctx,
            DecisionStatus::Bypassed,
            "bypassed: routing disabled".to_string(),
            Instant::now(),
        );
        self.telemetry.record_decision(&decision);
        decision
    }

    fn default_tier_decision(
        &self,
        ctx: &RoutingContext,
        status: DecisionStatus,
        reasoning: String,
        started: Instant,
    ) -> RoutingDecision {
        let tier = self.config.default_tier;
        RoutingDecision {
            status,
            primary_tier: Some(tier),
            fallback: FallbackPlan::none(),
            reasoning,
            confidence: FALLBACK_CONFIDENCE,
            estimated_latency_ms: self.estimated_latency_ms(tier),
            features: Vec::new(),
            final_action: PolicyAction::Allow,
            policy_decisions: Vec::new(),
            metadata: self.metadata(ctx, started),
        }
    }
}

/// Highest score first; equal scores keep tier precedence order
fn rank(mut candidates: Vec<ScoringResult>) -> Vec<ScoringResult> {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.tier.precedence().cmp(&b.tier.precedence()))
    });
    candidates
}
