//! Consistency-aware scoring

use super::ScoringFunction;
use crate::memory::types::{ConsistencyLevel, RoutingContext, ScoringFeature, ScoringResult, Tier};

/// Under strong consistency, durable tiers (episodic, semantic) beat volatile ones
#[derive(Debug, Clone)]
pub struct ConsistencyScoring {
    weight: f32,
}

impl ConsistencyScoring {
    pub const NAME: &'static str = "consistency";

    pub fn new(weight: f32) -> Self {
        Self { weight }
    }

    fn is_durable(tier: Tier) -> bool {
        matches!(tier, Tier::Episodic | Tier::Semantic)
    }
}

impl ScoringFunction for ConsistencyScoring {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn score(&self, ctx: &RoutingContext, tier: Tier) -> ScoringResult {
        if ctx.hints.consistency != Some(ConsistencyLevel::Strong) {
            return ScoringResult::new(tier, 0.5, 0.3);
        }

        let durable = Self::is_durable(tier);
        let score = if durable { 0.8 } else { 0.3 };
        let mut result = ScoringResult::new(tier, score, 0.8);
        result.features.push(ScoringFeature::new(
            "durable_tier",
            if durable { 1.0 } else { 0.0 },
            self.weight,
            score,
        ));
        result.reasoning.push(if durable {
            format!("strong consistency favors the durable {tier} tier")
        } else {
            format!("strong consistency penalizes the volatile {tier} tier")
        });
        result
    }
}
