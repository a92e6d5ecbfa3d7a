//! Context Analyzer - classifies intent, extracts entities and scores sentiment
//!
//! This module provides the `ContextAnalyzer` which inspects the content of a
//! memory operation to:
//! - Classify the caller's intent (store, retrieve, search, summarize, admin)
//! - Extract coarse entities (people, dates, organizations)
//! - Score sentiment polarity and magnitude with a keyword lexicon
//!
//! Analysis never fails: when disabled or on an internal error the analyzer
//! returns a fallback analysis derived purely from the operation kind.

pub mod entities;

pub use entities::{Entity, EntityLabel};

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AnalysisConfig;
use crate::memory::types::OperationKind;

/// Confidence of an intent inferred from the operation kind alone
const OPERATION_INTENT_CONFIDENCE: f32 = 0.7;
const SUMMARIZE_INTENT_CONFIDENCE: f32 = 0.8;
const ADMIN_INTENT_CONFIDENCE: f32 = 0.9;
/// Mean entity confidence assumed when nothing was extracted
const DEFAULT_ENTITY_CONFIDENCE: f32 = 0.5;

const SUMMARIZE_KEYWORDS: [&str; 4] = ["summarize", "summarise", "analyze", "analyse"];
const ADMIN_KEYWORDS: [&str; 3] = ["health", "status", "config"];

const POSITIVE_WORDS: [&str; 25] = [
    "love",
    "great",
    "excellent",
    "happy",
    "good",
    "best",
    "wonderful",
    "amazing",
    "fantastic",
    "beautiful",
    "awesome",
    "perfect",
    "enjoy",
    "pleased",
    "delighted",
    "excited",
    "glad",
    "thankful",
    "grateful",
    "brilliant",
    "outstanding",
    "superb",
    "terrific",
    "marvelous",
    "joyful",
];

const NEGATIVE_WORDS: [&str; 25] = [
    "hate",
    "bad",
    "terrible",
    "sad",
    "worst",
    "awful",
    "horrible",
    "disgusting",
    "angry",
    "frustrated",
    "disappointed",
    "upset",
    "annoying",
    "boring",
    "poor",
    "wrong",
    "fail",
    "failed",
    "ugly",
    "stupid",
    "pathetic",
    "dreadful",
    "miserable",
    "depressed",
    "worried",
];

/// What the caller is trying to do with memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Store,
    Retrieve,
    Search,
    Summarize,
    Admin,
}

impl Intent {
    /// Intent implied by the operation kind before looking at content
    pub fn from_operation(operation: OperationKind) -> Self {
        match operation {
            OperationKind::Store | OperationKind::Update => Intent::Store,
            OperationKind::Retrieve => Intent::Retrieve,
            OperationKind::Search => Intent::Search,
            OperationKind::Compress => Intent::Summarize,
            OperationKind::Delete | OperationKind::Health | OperationKind::Stats => Intent::Admin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    /// -1.0 (negative) to 1.0 (positive)
    pub polarity: f32,
    /// 0.0 to 1.0, share of emotionally loaded words
    pub magnitude: f32,
    pub confidence: f32,
}

impl Sentiment {
    pub fn neutral(confidence: f32) -> Self {
        Self {
            polarity: 0.0,
            magnitude: 0.0,
            confidence,
        }
    }
}

/// Output of one analysis pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub intent: Intent,
    pub intent_confidence: f32,
    pub entities: Vec<Entity>,
    pub sentiment: Sentiment,
    /// 0.4 intent + 0.3 mean entity + 0.3 sentiment confidence
    pub confidence: f32,
    pub duration_us: u64,
    /// True when content was not analyzed
    pub fallback: bool,
    pub notes: Vec<String>,
}

impl ContextAnalysis {
    /// Safe analysis derived from the operation kind only
    pub fn fallback(operation: OperationKind, note: impl Into<String>) -> Self {
        Self {
            intent: Intent::from_operation(operation),
            intent_confidence: 1.0,
            entities: Vec::new(),
            sentiment: Sentiment::neutral(1.0),
            confidence: 1.0,
            duration_us: 0,
            fallback: true,
            notes: vec![note.into()],
        }
    }

    pub fn mean_entity_confidence(&self) -> f32 {
        if self.entities.is_empty() {
            return DEFAULT_ENTITY_CONFIDENCE;
        }
        self.entities.iter().map(|e| e.confidence).sum::<f32>() / self.entities.len() as f32
    }
}

/// Stateless content analyzer
#[derive(Debug, Clone)]
pub struct ContextAnalyzer {
    config: AnalysisConfig,
}

impl ContextAnalyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Analyze an operation and its optional content. Never fails.
    pub fn analyze(&self, operation: OperationKind, content: Option<&str>) -> ContextAnalysis {
        if !self.config.enabled {
            return ContextAnalysis::fallback(operation, "fallback: context analysis disabled");
        }

        let started = Instant::now();
        match self.try_analyze(operation, content.unwrap_or_default()) {
            Ok(mut analysis) => {
                analysis.duration_us = started.elapsed().as_micros() as u64;
                debug!(
                    intent = ?analysis.intent,
                    entities = analysis.entities.len(),
                    polarity = analysis.sentiment.polarity,
                    confidence = analysis.confidence,
                    "Context analyzed"
                );
                analysis
            }
            Err(e) => {
                warn!(error = %e, "Context analysis failed, using fallback");
                ContextAnalysis::fallback(operation, format!("fallback: {e}"))
            }
        }
    }

    fn try_analyze(&self, operation: OperationKind, content: &str) -> Result<ContextAnalysis, String> {
        let mut notes = Vec::new();
        let text = truncate_at_word(content, self.config.max_content_length);
        if text.len() < content.len() {
            notes.push(format!(
                "content truncated to {} characters",
                self.config.max_content_length
            ));
        }

        let (intent, intent_confidence) = classify_intent(operation, text);
        let entities = entities::extract_entities(
            text,
            self.config.min_entity_confidence,
            self.config.max_entities,
        )?;
        let sentiment = analyze_sentiment(text);

        let mut analysis = ContextAnalysis {
            intent,
            intent_confidence,
            entities,
            sentiment,
            confidence: 0.0,
            duration_us: 0,
            fallback: false,
            notes,
        };
        analysis.confidence = (0.4 * intent_confidence
            + 0.3 * analysis.mean_entity_confidence()
            + 0.3 * sentiment.confidence)
            .clamp(0.0, 1.0);
        Ok(analysis)
    }
}

/// Operation-derived intent refined by keywords; later refinements win
fn classify_intent(operation: OperationKind, text: &str) -> (Intent, f32) {
    let lower = text.to_lowercase();
    let mut intent = (Intent::from_operation(operation), OPERATION_INTENT_CONFIDENCE);

    if SUMMARIZE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        intent = (Intent::Summarize, SUMMARIZE_INTENT_CONFIDENCE);
    }
    if ADMIN_KEYWORDS.iter().any(|k| lower.contains(k)) {
        intent = (Intent::Admin, ADMIN_INTENT_CONFIDENCE);
    }
    intent
}

/// Lexicon sentiment.
///
/// polarity = (pos - neg) / max(1, pos + neg)
/// magnitude = min(1, hits / max(1, 0.1 * words))
/// confidence = min(1, hits / max(1, 0.05 * words))
fn analyze_sentiment(text: &str) -> Sentiment {
    let mut positive = 0usize;
    let mut negative = 0usize;
    let mut total_words = 0usize;

    for word in text.to_lowercase().split_whitespace() {
        total_words += 1;
        let clean: String = word.chars().filter(|c| c.is_alphabetic()).collect();
        if POSITIVE_WORDS.contains(&clean.as_str()) {
            positive += 1;
        }
        if NEGATIVE_WORDS.contains(&clean.as_str()) {
            negative += 1;
        }
    }

    let hits = (positive + negative) as f32;
    let words = total_words as f32;
    let polarity = ((positive as f32 - negative as f32) / hits.max(1.0)).clamp(-1.0, 1.0);
    let magnitude = (hits / (0.1 * words).max(1.0)).min(1.0);
    let confidence = (hits / (0.05 * words).max(1.0)).min(1.0);

    Sentiment {
        polarity,
        magnitude,
        confidence,
    }
}

/// Cut text to at most `max_chars` characters, backing up to the last space
fn truncate_at_word(text: &str, max_chars: usize) -> &str {
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return text;
    };
    let truncated = &text[..cut];
    match truncated.rfind(' ') {
        Some(pos) => &text[..pos],
        None => truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_analyzer() -> ContextAnalyzer {
        ContextAnalyzer::new(AnalysisConfig {
            enabled: true,
            ..AnalysisConfig::default()
        })
    }

    mod intent {
        use super::*;

        #[test]
        fn test_intent_from_operation() {
            assert_eq!(Intent::from_operation(OperationKind::Store), Intent::Store);
            assert_eq!(Intent::from_operation(OperationKind::Retrieve), Intent::Retrieve);
            assert_eq!(Intent::from_operation(OperationKind::Search), Intent::Search);
            assert_eq!(Intent::from_operation(OperationKind::Health), Intent::Admin);
            assert_eq!(Intent::from_operation(OperationKind::Compress), Intent::Summarize);
        }

        #[test]
        fn test_summarize_keyword_refines_intent() {
            let analysis = enabled_analyzer()
                .analyze(OperationKind::Search, Some("please summarize last week"));
            assert_eq!(analysis.intent, Intent::Summarize);
            assert_eq!(analysis.intent_confidence, SUMMARIZE_INTENT_CONFIDENCE);
        }

        #[test]
        fn test_admin_keyword_refines_intent() {
            let analysis =
                enabled_analyzer().analyze(OperationKind::Retrieve, Some("what is the status"));
            assert_eq!(analysis.intent, Intent::Admin);
            assert_eq!(analysis.intent_confidence, ADMIN_INTENT_CONFIDENCE);
        }

        #[test]
        fn test_plain_content_keeps_operation_intent() {
            let analysis = enabled_analyzer().analyze(OperationKind::Store, Some("buy milk"));
            assert_eq!(analysis.intent, Intent::Store);
            assert_eq!(analysis.intent_confidence, OPERATION_INTENT_CONFIDENCE);
        }
    }

    mod sentiment {
        use super::*;

        #[test]
        fn test_sentiment_positive() {
            let s = analyze_sentiment("I love this amazing wonderful product, it's great!");
            assert_eq!(s.polarity, 1.0);
            assert!(s.magnitude > 0.0);
        }

        #[test]
        fn test_sentiment_negative() {
            let s = analyze_sentiment("I hate this terrible awful product, it's the worst!");
            assert_eq!(s.polarity, -1.0);
        }

        #[test]
        fn test_sentiment_mixed() {
            let s = analyze_sentiment("good bad bad");
            assert!((s.polarity - (-1.0 / 3.0)).abs() < 1e-6);
            assert_eq!(s.magnitude, 1.0);
            assert_eq!(s.confidence, 1.0);
        }

        #[test]
        fn test_sentiment_neutral() {
            let s = analyze_sentiment("The weather today is cloudy.");
            assert_eq!(s.polarity, 0.0);
            assert_eq!(s.magnitude, 0.0);
            assert_eq!(s.confidence, 0.0);
        }

        #[test]
        fn test_magnitude_scales_with_length() {
            // 1 hit in 40 words: magnitude = 1 / 4, confidence = 1 / 2
            let mut text = vec!["word"; 39].join(" ");
            text.push_str(" great");
            let s = analyze_sentiment(&text);
            assert!((s.magnitude - 0.25).abs() < 1e-6);
            assert!((s.confidence - 0.5).abs() < 1e-6);
        }

        #[test]
        fn test_values_in_range() {
            let texts = [
                "I absolutely love this!",
                "This is terrible and awful!",
                "The cat sat on the mat.",
                "",
            ];
            for text in texts {
                let s = analyze_sentiment(text);
                assert!((-1.0..=1.0).contains(&s.polarity));
                assert!((0.0..=1.0).contains(&s.magnitude));
                assert!((0.0..=1.0).contains(&s.confidence));
            }
        }
    }

    #[test]
    fn test_disabled_returns_fallback() {
        let analyzer = ContextAnalyzer::new(AnalysisConfig::default());
        let analysis = analyzer.analyze(OperationKind::Health, Some("John Smith is great"));

        assert!(analysis.fallback);
        assert_eq!(analysis.intent, Intent::Admin);
        assert!(analysis.entities.is_empty());
        assert_eq!(analysis.sentiment, Sentiment::neutral(1.0));
        assert_eq!(analysis.confidence, 1.0);
        assert!(analysis.notes[0].starts_with("fallback"));
    }

    #[test]
    fn test_overall_confidence_formula() {
        // intent 0.7, one date entity 0.9, no sentiment words
        let analysis =
            enabled_analyzer().analyze(OperationKind::Store, Some("deadline is 2024-06-01"));
        let expected = 0.4 * 0.7 + 0.3 * 0.9 + 0.3 * 0.0;
        assert!((analysis.confidence - expected).abs() < 1e-6);
        assert!(!analysis.fallback);
    }

    #[test]
    fn test_no_content_uses_default_entity_confidence() {
        let analysis = enabled_analyzer().analyze(OperationKind::Retrieve, None);
        let expected = 0.4 * 0.7 + 0.3 * DEFAULT_ENTITY_CONFIDENCE;
        assert!((analysis.confidence - expected).abs() < 1e-6);
        assert!(analysis.entities.is_empty());
    }

    #[test]
    fn test_long_content_is_truncated() {
        let analyzer = ContextAnalyzer::new(AnalysisConfig {
            enabled: true,
            max_content_length: 10,
            ..AnalysisConfig::default()
        });
        let analysis = analyzer.analyze(OperationKind::Store, Some("alpha beta gamma 2024-01-01"));
        assert!(analysis.entities.is_empty());
        assert!(analysis.notes.iter().any(|n| n.contains("truncated")));
    }

    #[test]
    fn test_truncate_at_word_is_char_safe() {
        assert_eq!(truncate_at_word("héllo wörld", 8), "héllo");
        assert_eq!(truncate_at_word("short", 10), "short");
        assert_eq!(truncate_at_word("abcdefgh", 4), "abcd");
    }
}
