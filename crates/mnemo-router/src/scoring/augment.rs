//! Multiplicative score adjustments from policy and context signals

use crate::analysis::{ContextAnalysis, Intent};
use crate::memory::types::{ScoringFeature, ScoringResult, Tier};
use crate::policy::{PolicyAction, PolicyDecision};

/// Policy action -> (favored tier, multiplier)
const POLICY_BOOSTS: [(PolicyAction, Tier, f32); 3] = [
    (PolicyAction::Compress, Tier::Semantic, 1.2),
    (PolicyAction::Retain, Tier::Episodic, 1.1),
    (PolicyAction::Redact, Tier::Working, 1.15),
];

const SUMMARIZE_SEMANTIC_BOOST: f32 = 1.3;
const ENTITY_SEARCH_SEMANTIC_BOOST: f32 = 1.25;
const ENTITY_SEARCH_MIN_ENTITIES: usize = 2;
const STORE_WORKING_BOOST: f32 = 1.2;
const EMOTIONAL_EPISODIC_BOOST: f32 = 1.1;
const EMOTIONAL_MAGNITUDE: f32 = 0.5;

/// Applies policy and context multipliers to raw tier scores.
///
/// Confidence is left as scored; only the score moves.
#[derive(Debug, Clone, Default)]
pub struct ScoreAugmenter;

impl ScoreAugmenter {
    pub fn new() -> Self {
        Self
    }

    pub fn augment(
        &self,
        results: Vec<ScoringResult>,
        decisions: &[PolicyDecision],
        analysis: Option<&ContextAnalysis>,
    ) -> Vec<ScoringResult> {
        results
            .into_iter()
            .map(|r| self.augment_one(r, decisions, analysis))
            .collect()
    }

    pub fn augment_one(
        &self,
        mut result: ScoringResult,
        decisions: &[PolicyDecision],
        analysis: Option<&ContextAnalysis>,
    ) -> ScoringResult {
        for (action, tier, multiplier) in POLICY_BOOSTS {
            if tier == result.tier && decisions.iter().any(|d| d.action == action) {
                apply(
                    &mut result,
                    &format!("policy_{}", action.as_str()),
                    multiplier,
                    format!("policy {} favors the {} tier", action.as_str(), tier),
                );
            }
        }

        // fallback analyses carry no content signal
        let Some(analysis) = analysis.filter(|a| !a.fallback) else {
            return result;
        };

        match (result.tier, analysis.intent) {
            (Tier::Semantic, Intent::Summarize) => apply(
                &mut result,
                "context_summarize",
                SUMMARIZE_SEMANTIC_BOOST,
                "summarize intent favors the semantic tier".to_string(),
            ),
            (Tier::Semantic, Intent::Search)
                if analysis.entities.len() >= ENTITY_SEARCH_MIN_ENTITIES =>
            {
                apply(
                    &mut result,
                    "context_entity_search",
                    ENTITY_SEARCH_SEMANTIC_BOOST,
                    format!(
                        "search with {} entities favors the semantic tier",
                        analysis.entities.len()
                    ),
                )
            }
            (Tier::Working, Intent::Store) => apply(
                &mut result,
                "context_store",
                STORE_WORKING_BOOST,
                "store intent favors the working tier".to_string(),
            ),
            _ => {}
        }

        if result.tier == Tier::Episodic && analysis.sentiment.magnitude > EMOTIONAL_MAGNITUDE {
            apply(
                &mut result,
                "context_sentiment",
                EMOTIONAL_EPISODIC_BOOST,
                format!(
                    "sentiment magnitude {:.2} favors the episodic tier",
                    analysis.sentiment.magnitude
                ),
            );
        }

        result
    }
}

fn apply(result: &mut ScoringResult, feature: &str, multiplier: f32, reason: String) {
    let before = result.score;
    result.score = (before * multiplier).clamp(0.0, 1.0);
    result.features.push(ScoringFeature::new(
        feature,
        multiplier,
        1.0,
        result.score - before,
    ));
    result.reasoning.push(format!("{reason} (x{multiplier:.2})"));
}
