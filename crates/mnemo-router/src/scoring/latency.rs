//! Latency-aware scoring for urgent operations

use std::collections::HashMap;

use super::ScoringFunction;
use crate::config::ScoringFunctionConfig;
use crate::memory::types::{RoutingContext, ScoringFeature, ScoringResult, Tier, Urgency};

/// Expected per-operation latency of each tier in milliseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierProfile {
    pub working_ms: f64,
    pub episodic_ms: f64,
    pub semantic_ms: f64,
    pub shared_ms: f64,
}

impl Default for TierProfile {
    fn default() -> Self {
        Self {
            working_ms: 1.0,
            episodic_ms: 10.0,
            semantic_ms: 50.0,
            shared_ms: 25.0,
        }
    }
}

impl TierProfile {
    pub fn expected_latency_ms(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Working => self.working_ms,
            Tier::Episodic => self.episodic_ms,
            Tier::Semantic => self.semantic_ms,
            Tier::Shared => self.shared_ms,
        }
    }

    /// Defaults overridden by `working_ms`, `episodic_ms`, `semantic_ms`, `shared_ms`
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        let defaults = Self::default();
        let get = |key: &str, default: f64| {
            parameters
                .get(key)
                .copied()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(default)
        };
        Self {
            working_ms: get("working_ms", defaults.working_ms),
            episodic_ms: get("episodic_ms", defaults.episodic_ms),
            semantic_ms: get("semantic_ms", defaults.semantic_ms),
            shared_ms: get("shared_ms", defaults.shared_ms),
        }
    }

    /// Profile of the first configured latency function, or the defaults
    pub fn from_scoring(functions: &[ScoringFunctionConfig]) -> Self {
        functions
            .iter()
            .find(|f| f.name == LatencyScoring::NAME)
            .map(|f| Self::from_parameters(&f.parameters))
            .unwrap_or_default()
    }
}

const NEUTRAL_SCORE: f32 = 0.5;
const NEUTRAL_CONFIDENCE: f32 = 0.3;
const URGENT_CONFIDENCE: f32 = 0.8;
/// Latency at which an urgent tier scores 0.5
const HALF_SCORE_MS: f64 = 10.0;

/// Favors fast tiers when the caller marks the operation urgent
#[derive(Debug, Clone)]
pub struct LatencyScoring {
    weight: f32,
    profile: TierProfile,
}

impl LatencyScoring {
    pub const NAME: &'static str = "latency";

    pub fn new(weight: f32, profile: TierProfile) -> Self {
        Self { weight, profile }
    }

    pub fn from_parameters(weight: f32, parameters: &HashMap<String, f64>) -> Self {
        Self::new(weight, TierProfile::from_parameters(parameters))
    }
}

impl ScoringFunction for LatencyScoring {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn weight(&self) -> f32 {
        self.weight
    }

    fn score(&self, ctx: &RoutingContext, tier: Tier) -> ScoringResult {
        let urgent = matches!(
            ctx.hints.urgency,
            Some(Urgency::High) | Some(Urgency::Critical)
        );
        if !urgent {
            return ScoringResult::new(tier, NEUTRAL_SCORE, NEUTRAL_CONFIDENCE);
        }

        let expected = self.profile.expected_latency_ms(tier);
        let score = (1.0 / (1.0 + expected / HALF_SCORE_MS)) as f32;

        let mut result = ScoringResult::new(tier, score, URGENT_CONFIDENCE);
        result.features.push(ScoringFeature::new(
            "expected_latency_ms",
            expected as f32,
            self.weight,
            result.score,
        ));
        result
            .reasoning
            .push(format!("urgent request, {tier} tier expects ~{expected:.1}ms"));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::OperationKind;

    #[test]
    fn test_neutral_without_urgency() {
        let scoring = LatencyScoring::new(1.0, TierProfile::default());
        let ctx = RoutingContext::new(OperationKind::Retrieve).with_urgency(Urgency::Normal);
        for tier in Tier::ALL {
            let result = scoring.score(&ctx, tier);
            assert_eq!(result.score, NEUTRAL_SCORE);
            assert!(result.features.is_empty());
        }
    }

    #[test]
    fn test_urgent_prefers_fastest_tier() {
        let scoring = LatencyScoring::new(1.0, TierProfile::default());
        let ctx = RoutingContext::new(OperationKind::Retrieve).with_urgency(Urgency::Critical);
        let working = scoring.score(&ctx, Tier::Working).score;
        let episodic = scoring.score(&ctx, Tier::Episodic).score;
        let semantic = scoring.score(&ctx, Tier::Semantic).score;
        assert!(working > episodic && episodic > semantic);
        assert!((episodic - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_profile_parameters_override_defaults() {
        let params = HashMap::from([
            ("semantic_ms".to_string(), 0.5),
            ("shared_ms".to_string(), -3.0),
        ]);
        let profile = TierProfile::from_parameters(&params);
        assert_eq!(profile.semantic_ms, 0.5);
        assert_eq!(profile.shared_ms, TierProfile::default().shared_ms);
        assert_eq!(profile.working_ms, 1.0);
    }
}
