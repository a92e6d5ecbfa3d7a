//! Integration tests for tier selection
//!
//! Tests verify that:
//! - Operation affinity and user hints pick the expected tier
//! - Identical inputs give identical decisions
//! - Scores stay within [0, 1] for every operation
//! - Ties resolve by tier precedence
//! - A failing scorer produces a fallback decision instead of an error

use std::collections::HashMap;
use std::sync::Arc;

use mnemo_router::config::{Config, RoutingAlgorithm, ScoringFunctionConfig};
use mnemo_router::memory::{
    ConsistencyLevel, DecisionStatus, FallbackStrategy, OperationKind, RoutingContext, Tier,
    Urgency,
};
use mnemo_router::router::{FALLBACK_CONFIDENCE, Router};
use mnemo_router::scoring::TierScorer;
use mnemo_router::telemetry::Telemetry;
use mnemo_router::testing::{FixedScoring, running_orchestrator, search_ctx};

fn scoring(names: &[&str]) -> Vec<ScoringFunctionConfig> {
    names
        .iter()
        .map(|name| ScoringFunctionConfig {
            name: name.to_string(),
            weight: 1.0,
            enabled: true,
            parameters: HashMap::new(),
        })
        .collect()
}

#[tokio::test]
async fn test_search_prefers_semantic() {
    let orchestrator = running_orchestrator(Config::default());
    let ctx = search_ctx(&"x".repeat(50));

    let decision = orchestrator.route(&ctx).await.unwrap();
    assert_eq!(decision.status, DecisionStatus::Decided);
    assert_eq!(decision.primary_tier, Some(Tier::Semantic));
    assert!(decision.reasoning.contains("selected semantic"));
    assert!(decision.features.iter().any(|f| f.name == "operation_affinity"));
}

#[tokio::test]
async fn test_hint_overrides_store_affinity() {
    let orchestrator = running_orchestrator(Config::default());
    let ctx = RoutingContext::new(OperationKind::Store).with_preferred_tier(Tier::Episodic);

    let decision = orchestrator.route(&ctx).await.unwrap();
    assert_eq!(decision.primary_tier, Some(Tier::Episodic));
    assert!(!decision.fallback.tiers.contains(&Tier::Episodic));
    assert_eq!(decision.fallback.tiers.first(), Some(&Tier::Working));
}

#[tokio::test]
async fn test_routing_is_deterministic() {
    let orchestrator = running_orchestrator(Config::default());
    let ctx = RoutingContext::new(OperationKind::Retrieve)
        .with_content("what did we decide about the launch date?")
        .with_session("s-1");

    let first = orchestrator.route(&ctx).await.unwrap();
    for _ in 0..5 {
        let again = orchestrator.route(&ctx).await.unwrap();
        assert_eq!(again.primary_tier, first.primary_tier);
        assert_eq!(again.confidence, first.confidence);
        assert_eq!(again.features, first.features);
        assert_eq!(again.fallback, first.fallback);
        assert_eq!(again.final_action, first.final_action);
        assert_ne!(again.metadata.correlation_id, first.metadata.correlation_id);
    }
}

#[tokio::test]
async fn test_scores_are_normalized_for_every_operation() {
    let mut config = Config::default();
    config.orchestrator.scoring = scoring(&["heuristic", "latency", "consistency"]);
    let orchestrator = running_orchestrator(config);

    let long = "a fairly long sentence about nothing in particular ".repeat(20);
    for operation in OperationKind::ALL {
        for content in [None, Some("short"), Some(long.as_str())] {
            let mut ctx = RoutingContext::new(operation)
                .with_urgency(Urgency::Critical)
                .with_consistency(ConsistencyLevel::Strong)
                .with_preferred_tier(Tier::Shared);
            ctx.content = content.map(str::to_string);

            let results = orchestrator.score_tiers(&ctx).unwrap();
            assert_eq!(results.len(), Tier::ALL.len());
            for result in &results {
                assert!((0.0..=1.0).contains(&result.score), "{operation}: {}", result.score);
                assert!((0.0..=1.0).contains(&result.confidence));
            }

            let decision = orchestrator.route(&ctx).await.unwrap();
            assert!((0.0..=1.0).contains(&decision.confidence));
        }
    }
}

#[tokio::test]
async fn test_equal_scores_resolve_by_precedence() {
    let mut config = Config::default();
    config.policy.enabled = false;
    let telemetry = Arc::new(Telemetry::default());
    let router = Router::new(&config, telemetry).unwrap().with_scorer(TierScorer::new(
        RoutingAlgorithm::Weighted,
        vec![Box::new(FixedScoring::new(0.5))],
    ));

    let decision = router.route(&search_ctx("anything")).await;
    assert_eq!(decision.primary_tier, Some(Tier::Working));
    assert_eq!(
        decision.fallback.tiers,
        vec![Tier::Episodic, Tier::Semantic, Tier::Shared]
    );
}

#[tokio::test]
async fn test_nan_score_falls_back_to_default_tier() {
    let mut config = Config::default();
    config.orchestrator.default_tier = Tier::Shared;
    let telemetry = Arc::new(Telemetry::default());
    let router = Router::new(&config, telemetry.clone())
        .unwrap()
        .with_scorer(TierScorer::new(
            RoutingAlgorithm::Weighted,
            vec![Box::new(FixedScoring::new(f32::NAN))],
        ));

    let decision = router.route(&search_ctx("anything")).await;
    assert_eq!(decision.status, DecisionStatus::Fallback);
    assert_eq!(decision.primary_tier, Some(Tier::Shared));
    assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
    assert!(decision.reasoning.starts_with("fallback:"));
    assert_eq!(telemetry.snapshot().routing.fallback, 1);
}

#[tokio::test]
async fn test_urgent_requests_favor_fast_tiers() {
    let mut config = Config::default();
    config.orchestrator.scoring = scoring(&["latency"]);
    let orchestrator = running_orchestrator(config);

    let ctx = RoutingContext::new(OperationKind::Retrieve).with_urgency(Urgency::Critical);
    let decision = orchestrator.route(&ctx).await.unwrap();
    assert_eq!(decision.primary_tier, Some(Tier::Working));

    let scores = orchestrator.score_tiers(&ctx).unwrap();
    assert!(scores[0].score > scores[2].score);
}

#[tokio::test]
async fn test_strong_consistency_favors_durable_tiers() {
    let mut config = Config::default();
    config.orchestrator.scoring = scoring(&["consistency"]);
    let orchestrator = running_orchestrator(config);

    let ctx = RoutingContext::new(OperationKind::Store).with_consistency(ConsistencyLevel::Strong);
    let decision = orchestrator.route(&ctx).await.unwrap();
    let primary = decision.primary_tier.unwrap();
    assert!(matches!(primary, Tier::Episodic | Tier::Semantic));
}

#[tokio::test]
async fn test_simple_algorithm_uses_first_function_only() {
    let mut config = Config::default();
    config.orchestrator.algorithm = RoutingAlgorithm::Simple;
    config.orchestrator.scoring = scoring(&["heuristic", "latency"]);
    let orchestrator = running_orchestrator(config);

    let ctx = search_ctx("q").with_urgency(Urgency::Critical);
    let results = orchestrator.score_tiers(&ctx).unwrap();
    assert!(
        results
            .iter()
            .all(|r| r.features.iter().all(|f| f.name != "expected_latency_ms"))
    );
}

#[tokio::test]
async fn test_fallback_strategy_none_has_no_runners_up() {
    let mut config = Config::default();
    config.orchestrator.fallback_strategy = FallbackStrategy::None;
    let orchestrator = running_orchestrator(config);

    let decision = orchestrator.route(&search_ctx("q")).await.unwrap();
    assert_eq!(decision.fallback.strategy, FallbackStrategy::None);
    assert!(decision.fallback.tiers.is_empty());
}

#[tokio::test]
async fn test_decisions_are_counted_by_tier() {
    let orchestrator = running_orchestrator(Config::default());
    orchestrator.route(&search_ctx("one")).await.unwrap();
    orchestrator.route(&search_ctx("two")).await.unwrap();
    orchestrator
        .route(&RoutingContext::new(OperationKind::Store).with_content("three"))
        .await
        .unwrap();

    let metrics = orchestrator.get_metrics();
    assert_eq!(metrics.routing.total, 3);
    assert_eq!(metrics.routing.by_tier.get(&Tier::Semantic), Some(&2));
    assert_eq!(metrics.routing.by_tier.get(&Tier::Working), Some(&1));
    assert_eq!(metrics.scoring.decisions, 3);
    assert!(metrics.routing.latency_us.is_some());
}
