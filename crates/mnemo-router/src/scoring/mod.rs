//! Tier scoring
//!
//! Each scoring function is a named, weighted strategy that rates one tier
//! for a routing context. `TierScorer` runs the configured functions for
//! every tier and combines them according to the routing algorithm.

pub mod augment;
pub mod consistency;
pub mod heuristic;
pub mod latency;

pub use augment::ScoreAugmenter;
pub use consistency::ConsistencyScoring;
pub use heuristic::HeuristicScoring;
pub use latency::{LatencyScoring, TierProfile};

use tracing::warn;

use crate::config::{OrchestratorConfig, RoutingAlgorithm, ScoringFunctionConfig};
use crate::error::{MnemoError, Result};
use crate::memory::types::{RoutingContext, ScoringResult, Tier};

/// A pluggable scoring strategy
pub trait ScoringFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Relative weight in weighted aggregation
    fn weight(&self) -> f32;

    /// Rate `tier` for `ctx`. Must be pure: identical inputs give identical output.
    fn score(&self, ctx: &RoutingContext, tier: Tier) -> ScoringResult;
}

/// Names accepted in `[[orchestrator.scoring]]`
pub const KNOWN_FUNCTIONS: [&str; 3] = [
    HeuristicScoring::NAME,
    LatencyScoring::NAME,
    ConsistencyScoring::NAME,
];

/// Build a scoring function from its config entry
pub fn build_function(config: &ScoringFunctionConfig) -> Result<Box<dyn ScoringFunction>> {
    match config.name.as_str() {
        HeuristicScoring::NAME => Ok(Box::new(HeuristicScoring::new(config.weight))),
        LatencyScoring::NAME => Ok(Box::new(LatencyScoring::from_parameters(
            config.weight,
            &config.parameters,
        ))),
        ConsistencyScoring::NAME => Ok(Box::new(ConsistencyScoring::new(config.weight))),
        other => Err(MnemoError::Config(format!(
            "unknown scoring function '{}' (expected one of: {})",
            other,
            KNOWN_FUNCTIONS.join(", ")
        ))),
    }
}

/// Runs scoring functions over all tiers and aggregates their results
pub struct TierScorer {
    algorithm: RoutingAlgorithm,
    functions: Vec<Box<dyn ScoringFunction>>,
}

impl TierScorer {
    pub fn new(algorithm: RoutingAlgorithm, functions: Vec<Box<dyn ScoringFunction>>) -> Self {
        Self {
            algorithm,
            functions,
        }
    }

    /// Build from the enabled scoring entries of `config`
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        let functions = config
            .scoring
            .iter()
            .filter(|f| f.enabled)
            .map(build_function)
            .collect::<Result<Vec<_>>>()?;

        if functions.is_empty() {
            return Err(MnemoError::Config(
                "at least one scoring function must be enabled".to_string(),
            ));
        }

        if config.algorithm == RoutingAlgorithm::MlBased {
            warn!("ml-based routing has no model available, using weighted aggregation");
        }

        Ok(Self::new(config.algorithm, functions))
    }

    pub fn algorithm(&self) -> RoutingAlgorithm {
        self.algorithm
    }

    pub fn function_names(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.name().to_string()).collect()
    }

    /// One result per tier, in tier precedence order
    pub fn score_tiers(&self, ctx: &RoutingContext) -> Result<Vec<ScoringResult>> {
        Tier::ALL.iter().map(|&tier| self.score_tier(ctx, tier)).collect()
    }

    pub fn score_tier(&self, ctx: &RoutingContext, tier: Tier) -> Result<ScoringResult> {
        let Some(first) = self.functions.first() else {
            return Err(MnemoError::Routing("no scoring functions configured".to_string()));
        };

        let result = match self.algorithm {
            RoutingAlgorithm::Simple => first.score(ctx, tier),
            RoutingAlgorithm::Weighted | RoutingAlgorithm::MlBased => {
                let results: Vec<(f32, ScoringResult)> = self
                    .functions
                    .iter()
                    .map(|f| (f.weight(), f.score(ctx, tier)))
                    .collect();
                weighted_aggregate(tier, results)?
            }
        };

        if !result.score.is_finite() || !result.confidence.is_finite() {
            return Err(MnemoError::Routing(format!(
                "non-finite score for tier {tier}"
            )));
        }
        Ok(result)
    }
}

/// Weight-normalized mean of scores and confidences; features and reasoning concatenate
fn weighted_aggregate(tier: Tier, results: Vec<(f32, ScoringResult)>) -> Result<ScoringResult> {
    if let [(_, only)] = results.as_slice() {
        return Ok(only.clone());
    }

    let total_weight: f32 = results.iter().map(|(w, _)| *w).sum();
    if total_weight <= 0.0 || !total_weight.is_finite() {
        return Err(MnemoError::Routing(format!(
            "invalid total scoring weight {total_weight}"
        )));
    }

    let score = results.iter().map(|(w, r)| w * r.score).sum::<f32>() / total_weight;
    let confidence = results.iter().map(|(w, r)| w * r.confidence).sum::<f32>() / total_weight;

    let mut combined = ScoringResult::new(tier, score, confidence);
    for (_, result) in results {
        combined.features.extend(result.features);
        combined.reasoning.extend(result.reasoning);
    }
    Ok(combined)
}
