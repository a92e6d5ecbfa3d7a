//! Default scoring strategy: operation affinity, content length and user hint

use super::ScoringFunction;
use crate::memory::types::{OperationKind, RoutingContext, ScoringFeature, ScoringResult, Tier};

const BASE_SCORE: f32 = 0.5;
const LONG_CONTENT_CHARS: usize = 500;
const SHORT_CONTENT_CHARS: usize = 100;
const LONG_CONTENT_BONUS: f32 = 0.2;
const SHORT_CONTENT_BONUS: f32 = 0.1;
const PREFERRED_TIER_BONUS: f32 = 0.8;

/// Best-fit tier for an operation and the bonus it earns
fn operation_affinity(operation: OperationKind) -> Option<(Tier, f32)> {
    match operation {
        OperationKind::Search => Some((Tier::Semantic, 0.5)),
        OperationKind::Store => Some((Tier::Working, 0.4)),
        OperationKind::Retrieve => Some((Tier::Episodic, 0.4)),
        OperationKind::Update => Some((Tier::Working, 0.3)),
        OperationKind::Compress => Some((Tier::Semantic, 0.3)),
        OperationKind::Delete | OperationKind::Health | OperationKind::Stats => None,
    }
}

/// Confidence bucket for a final heuristic score
fn confidence_for(score: f32) -> f32 {
    if score > 0.7 {
        0.9
    } else if score > 0.5 {
        0.7
    } else {
        0.4
    }
}

/// Additive heuristic scoring from a 0.5 base, clamped to [0, 1]
#[derive(Debug, Clone)]
pub struct HeuristicScoring {
    weight: f32,
}

impl HeuristicScoring {
    pub const NAME: &'static str = "heuristic";

    pub fn new(weight: f32) -> Self {
        Self { weight }
    }
}

impl ScoringFunction for HeuristicScoring {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn score(&self, ctx: &RoutingContext, tier: Tier) -> ScoringResult {
        let mut total = BASE_SCORE;
        let mut features = vec![ScoringFeature::new("base", BASE_SCORE, 1.0, BASE_SCORE)];
        let mut reasoning = Vec::new();

        let affinity = operation_affinity(ctx.operation).filter(|(best, _)| *best == tier);
        let affinity_fired = affinity.is_some();
        if let Some((_, bonus)) = affinity {
            total += bonus;
            features.push(ScoringFeature::new("operation_affinity", 1.0, bonus, bonus));
            reasoning.push(format!("{} operations fit the {} tier", ctx.operation, tier));
        }

        if !affinity_fired && ctx.content.is_some() {
            let length = ctx.content_len();
            let bonus = match tier {
                Tier::Semantic if length > LONG_CONTENT_CHARS => Some(LONG_CONTENT_BONUS),
                Tier::Working if length < SHORT_CONTENT_CHARS => Some(SHORT_CONTENT_BONUS),
                _ => None,
            };
            if let Some(bonus) = bonus {
                total += bonus;
                features.push(ScoringFeature::new(
                    "content_length",
                    length as f32,
                    bonus,
                    bonus,
                ));
                reasoning.push(format!("content length {length} suits the {tier} tier"));
            }
        }

        if ctx.hints.preferred_tier == Some(tier) {
            total += PREFERRED_TIER_BONUS;
            features.push(ScoringFeature::new(
                "user_hint",
                1.0,
                PREFERRED_TIER_BONUS,
                PREFERRED_TIER_BONUS,
            ));
            reasoning.push(format!("caller prefers the {tier} tier"));
        }

        let score = total.clamp(0.0, 1.0);
        let mut result = ScoringResult::new(tier, score, confidence_for(score));
        result.features = features;
        result.reasoning = reasoning;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(ctx: &RoutingContext, tier: Tier) -> ScoringResult {
        HeuristicScoring::new(1.0).score(ctx, tier)
    }

    #[test]
    fn test_search_favors_semantic() {
        let ctx = RoutingContext::new(OperationKind::Search).with_content("x".repeat(50));
        assert_eq!(score(&ctx, Tier::Semantic).score, 1.0);
        assert!((score(&ctx, Tier::Working).score - 0.6).abs() < 1e-6);
        assert_eq!(score(&ctx, Tier::Episodic).score, 0.5);
    }

    #[test]
    fn test_length_bonus_skipped_when_affinity_fired() {
        let ctx = RoutingContext::new(OperationKind::Store).with_content("short");
        let working = score(&ctx, Tier::Working);
        assert!((working.score - 0.9).abs() < 1e-6);
        assert!(working.features.iter().all(|f| f.name != "content_length"));
    }

    #[test]
    fn test_long_content_favors_semantic() {
        let ctx = RoutingContext::new(OperationKind::Delete).with_content("y".repeat(600));
        let semantic = score(&ctx, Tier::Semantic);
        assert!((semantic.score - 0.7).abs() < 1e-6);
        assert!(semantic.features.iter().any(|f| f.name == "content_length"));
    }

    #[test]
    fn test_no_content_has_no_length_signal() {
        let ctx = RoutingContext::new(OperationKind::Delete);
        for tier in Tier::ALL {
            assert_eq!(score(&ctx, tier).score, 0.5);
        }
    }

    #[test]
    fn test_hint_dominates_affinity() {
        let ctx = RoutingContext::new(OperationKind::Store).with_preferred_tier(Tier::Episodic);
        assert_eq!(score(&ctx, Tier::Episodic).score, 1.0);
        assert!(score(&ctx, Tier::Working).score < 1.0);
    }

    #[test]
    fn test_confidence_buckets() {
        assert_eq!(confidence_for(0.95), 0.9);
        assert_eq!(confidence_for(0.7), 0.7);
        assert_eq!(confidence_for(0.6), 0.7);
        assert_eq!(confidence_for(0.5), 0.4);
    }

    #[test]
    fn test_features_explain_score() {
        let ctx = RoutingContext::new(OperationKind::Search)
            .with_content("q")
            .with_preferred_tier(Tier::Working);
        let working = score(&ctx, Tier::Working);
        let sum: f32 = working.features.iter().map(|f| f.contribution).sum();
        // 0.5 base + 0.1 short content + 0.8 hint, before clamping
        assert!((sum - 1.4).abs() < 1e-6);
        assert_eq!(working.score, 1.0);
        assert_eq!(working.reasoning.len(), 2);
    }
}
