//! Policy evaluation for memory operations
//!
//! Independent rule families (retention, compression, safety, access control)
//! each contribute zero or one decision. The decisions are resolved into a
//! single final action by fixed priority:
//!
//! deny(6) > escalate(5) > redact(4) > throttle(3) > compress(2) > retain(1) > allow(0)
//!
//! Ties keep the first decision in rule order. When evaluation itself fails or
//! times out, the configured failure mode decides between a single allow
//! (fail-open) and a single deny (fail-closed) decision.

pub mod rules;

pub use rules::{AccessControlRule, CompressionRule, PolicyRule, RetentionRule, SafetyRule};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{PolicyConfig, PolicyFailureMode};
use crate::error::Result;
use crate::memory::types::{OperationKind, RoutingContext, Tier};

/// Rule id used for decisions synthesized after an evaluation failure
pub const POLICY_FAILURE_RULE_ID: &str = "policy-failure";

/// Verdict of one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    #[default]
    Allow,
    Deny,
    Redact,
    Compress,
    Retain,
    Throttle,
    Escalate,
}

impl PolicyAction {
    /// Conflict-resolution priority; higher wins
    pub fn priority(self) -> u8 {
        match self {
            PolicyAction::Deny => 6,
            PolicyAction::Escalate => 5,
            PolicyAction::Redact => 4,
            PolicyAction::Throttle => 3,
            PolicyAction::Compress => 2,
            PolicyAction::Retain => 1,
            PolicyAction::Allow => 0,
        }
    }

    /// Actions the router reports but leaves to the caller or store
    pub fn is_advisory(self) -> bool {
        matches!(
            self,
            PolicyAction::Redact
                | PolicyAction::Compress
                | PolicyAction::Throttle
                | PolicyAction::Escalate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyAction::Allow => "allow",
            PolicyAction::Deny => "deny",
            PolicyAction::Redact => "redact",
            PolicyAction::Compress => "compress",
            PolicyAction::Retain => "retain",
            PolicyAction::Throttle => "throttle",
            PolicyAction::Escalate => "escalate",
        }
    }
}

/// One rule's verdict on an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub rule_id: String,
    pub rule_name: String,
    pub action: PolicyAction,
    pub confidence: f32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PolicyDecision {
    pub fn new(
        rule_id: &str,
        rule_name: &str,
        action: PolicyAction,
        confidence: f32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            rule_name: rule_name.to_string(),
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Pick the highest-priority decision; ties keep the first. Empty means allow.
pub fn resolve_final_action(decisions: &[PolicyDecision]) -> PolicyAction {
    resolve_final_decision(decisions)
        .map(|d| d.action)
        .unwrap_or_default()
}

/// The decision that determines the final action, if any
pub fn resolve_final_decision(decisions: &[PolicyDecision]) -> Option<&PolicyDecision> {
    decisions.iter().fold(None, |best: Option<&PolicyDecision>, d| match best {
        Some(b) if b.action.priority() >= d.action.priority() => Some(b),
        _ => Some(d),
    })
}

/// Errors raised while evaluating rules
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("policy evaluation timed out after {0}ms")]
    Timeout(u64),

    #[error("rule '{rule}' failed: {message}")]
    Rule { rule: String, message: String },
}

/// Everything a rule may look at
#[derive(Debug, Clone, Copy)]
pub struct PolicyRequest<'a> {
    pub operation: OperationKind,
    pub content: Option<&'a str>,
    pub tier: Tier,
    pub user_id: Option<&'a str>,
    pub content_type: Option<&'a str>,
}

impl<'a> PolicyRequest<'a> {
    pub fn new(operation: OperationKind, tier: Tier) -> Self {
        Self {
            operation,
            content: None,
            tier,
            user_id: None,
            content_type: None,
        }
    }

    pub fn from_context(ctx: &'a RoutingContext, tier: Tier) -> Self {
        Self {
            operation: ctx.operation,
            content: ctx.content.as_deref(),
            tier,
            user_id: ctx.metadata.user_id.as_deref(),
            content_type: ctx.metadata.content_type.as_deref(),
        }
    }

    pub fn with_content(mut self, content: &'a str) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_user(mut self, user_id: &'a str) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_content_type(mut self, content_type: &'a str) -> Self {
        self.content_type = Some(content_type);
        self
    }
}

/// Decisions plus the resolved final action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyOutcome {
    pub decisions: Vec<PolicyDecision>,
    pub final_action: PolicyAction,
    /// True when the outcome was synthesized by the failure mode
    pub failed: bool,
    pub duration_us: u64,
}

impl PolicyOutcome {
    pub fn from_decisions(decisions: Vec<PolicyDecision>) -> Self {
        let final_action = resolve_final_action(&decisions);
        Self {
            decisions,
            final_action,
            failed: false,
            duration_us: 0,
        }
    }

    pub fn is_denied(&self) -> bool {
        self.final_action == PolicyAction::Deny
    }

    /// Reason of the decision that set the final action
    pub fn final_reason(&self) -> Option<&str> {
        resolve_final_decision(&self.decisions).map(|d| d.reason.as_str())
    }

    pub fn contains(&self, action: PolicyAction) -> bool {
        self.decisions.iter().any(|d| d.action == action)
    }
}

/// Runs the configured rule families against an operation
pub struct PolicyEvaluator {
    enabled: bool,
    timeout: Duration,
    failure_mode: PolicyFailureMode,
    rules: Vec<Arc<dyn PolicyRule>>,
}

impl PolicyEvaluator {
    /// Build the built-in rule families that are enabled in `config`
    pub fn new(config: &PolicyConfig) -> Result<Self> {
        let mut rules: Vec<Arc<dyn PolicyRule>> =
            vec![Arc::new(RetentionRule::new(config.retention.clone()))];

        if config.compression.enabled {
            rules.push(Arc::new(CompressionRule::new(
                config.compression.threshold_chars,
            )));
        }
        if config.safety.enabled {
            rules.push(Arc::new(SafetyRule::new(&config.safety)?));
        }
        if config.access.enabled {
            rules.push(Arc::new(AccessControlRule::new(config.access.clone())));
        }

        Ok(Self {
            enabled: config.enabled,
            timeout: Duration::from_millis(config.timeout_ms),
            failure_mode: config.failure_mode,
            rules,
        })
    }

    /// Append a custom rule; it runs after the built-in families
    pub fn with_rule(mut self, rule: Arc<dyn PolicyRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Evaluate every rule concurrently, bounded by the configured timeout.
    ///
    /// Never returns an error: failures are converted by the failure mode.
    pub async fn evaluate(&self, request: &PolicyRequest<'_>) -> PolicyOutcome {
        if !self.enabled {
            return PolicyOutcome::from_decisions(Vec::new());
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.run_rules(request)).await {
            Ok(result) => result,
            Err(_) => Err(PolicyError::Timeout(self.timeout.as_millis() as u64)),
        };

        let mut outcome = match result {
            Ok(decisions) => PolicyOutcome::from_decisions(decisions),
            Err(e) => self.failure_outcome(&e),
        };
        outcome.duration_us = started.elapsed().as_micros() as u64;

        debug!(
            operation = %request.operation,
            tier = %request.tier,
            decisions = outcome.decisions.len(),
            final_action = outcome.final_action.as_str(),
            "Policy evaluated"
        );
        outcome
    }

    async fn run_rules(
        &self,
        request: &PolicyRequest<'_>,
    ) -> std::result::Result<Vec<PolicyDecision>, PolicyError> {
        let results = join_all(self.rules.iter().map(|rule| rule.evaluate(request))).await;

        // join_all preserves rule order, which keeps tie-breaking deterministic
        let mut decisions = Vec::new();
        for result in results {
            if let Some(decision) = result? {
                decisions.push(decision);
            }
        }
        Ok(decisions)
    }

    fn failure_outcome(&self, error: &PolicyError) -> PolicyOutcome {
        let (action, suffix) = match self.failure_mode {
            PolicyFailureMode::FailOpen => (PolicyAction::Allow, "failing open"),
            PolicyFailureMode::FailClosed => (PolicyAction::Deny, "failing closed"),
        };
        warn!(error = %error, mode = suffix, "Policy evaluation failed");

        let decision = PolicyDecision::new(
            POLICY_FAILURE_RULE_ID,
            "Policy evaluation failure",
            action,
            0.0,
            format!("{error}; {suffix}"),
        );
        PolicyOutcome {
            decisions: vec![decision],
            final_action: action,
            failed: true,
            duration_us: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyMode;
    use async_trait::async_trait;

    fn decision(action: PolicyAction, id: &str) -> PolicyDecision {
        PolicyDecision::new(id, id, action, 0.5, "test")
    }

    mod resolution {
        use super::*;

        #[test]
        fn test_empty_is_allow() {
            assert_eq!(resolve_final_action(&[]), PolicyAction::Allow);
        }

        #[test]
        fn test_highest_priority_wins() {
            let decisions = vec![
                decision(PolicyAction::Retain, "a"),
                decision(PolicyAction::Redact, "b"),
                decision(PolicyAction::Compress, "c"),
            ];
            assert_eq!(resolve_final_action(&decisions), PolicyAction::Redact);
        }

        #[test]
        fn test_deny_beats_everything() {
            let decisions = vec![
                decision(PolicyAction::Escalate, "a"),
                decision(PolicyAction::Deny, "b"),
                decision(PolicyAction::Redact, "c"),
            ];
            assert_eq!(resolve_final_action(&decisions), PolicyAction::Deny);
        }

        #[test]
        fn test_tie_keeps_first() {
            let decisions = vec![
                decision(PolicyAction::Deny, "first"),
                decision(PolicyAction::Deny, "second"),
            ];
            let winner = resolve_final_decision(&decisions).unwrap();
            assert_eq!(winner.rule_id, "first");
        }

        #[test]
        fn test_priorities_are_strictly_ordered() {
            let order = [
                PolicyAction::Allow,
                PolicyAction::Retain,
                PolicyAction::Compress,
                PolicyAction::Throttle,
                PolicyAction::Redact,
                PolicyAction::Escalate,
                PolicyAction::Deny,
            ];
            for pair in order.windows(2) {
                assert!(pair[0].priority() < pair[1].priority());
            }
        }
    }

    struct FailingRule;

    #[async_trait]
    impl PolicyRule for FailingRule {
        fn id(&self) -> &str {
            "failing"
        }

        fn name(&self) -> &str {
            "Always fails"
        }

        async fn evaluate(
            &self,
            _request: &PolicyRequest<'_>,
        ) -> std::result::Result<Option<PolicyDecision>, PolicyError> {
            Err(PolicyError::Rule {
                rule: "failing".to_string(),
                message: "backend unavailable".to_string(),
            })
        }
    }

    struct SlowRule;

    #[async_trait]
    impl PolicyRule for SlowRule {
        fn id(&self) -> &str {
            "slow"
        }

        fn name(&self) -> &str {
            "Sleeps past the timeout"
        }

        async fn evaluate(
            &self,
            _request: &PolicyRequest<'_>,
        ) -> std::result::Result<Option<PolicyDecision>, PolicyError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_disabled_passes_through() {
        let config = PolicyConfig {
            enabled: false,
            ..PolicyConfig::default()
        };
        let evaluator = PolicyEvaluator::new(&config).unwrap();
        let outcome = evaluator
            .evaluate(&PolicyRequest::new(OperationKind::Store, Tier::Working))
            .await;
        assert!(outcome.decisions.is_empty());
        assert_eq!(outcome.final_action, PolicyAction::Allow);
    }

    #[tokio::test]
    async fn test_default_rules_emit_retention() {
        let evaluator = PolicyEvaluator::new(&PolicyConfig::default()).unwrap();
        assert_eq!(evaluator.rule_ids(), vec!["retention-policy", "compression-threshold"]);

        let outcome = evaluator
            .evaluate(&PolicyRequest::new(OperationKind::Store, Tier::Working).with_content("hi"))
            .await;
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.final_action, PolicyAction::Retain);
    }

    #[tokio::test]
    async fn test_rule_failure_fails_open() {
        let evaluator = PolicyEvaluator::new(&PolicyConfig::default())
            .unwrap()
            .with_rule(Arc::new(FailingRule));
        let outcome = evaluator
            .evaluate(&PolicyRequest::new(OperationKind::Store, Tier::Working))
            .await;

        assert!(outcome.failed);
        assert_eq!(outcome.decisions.len(), 1);
        assert_eq!(outcome.decisions[0].rule_id, POLICY_FAILURE_RULE_ID);
        assert_eq!(outcome.final_action, PolicyAction::Allow);
    }

    #[tokio::test]
    async fn test_rule_failure_fails_closed() {
        let config = PolicyConfig {
            failure_mode: PolicyFailureMode::FailClosed,
            ..PolicyConfig::default()
        };
        let evaluator = PolicyEvaluator::new(&config)
            .unwrap()
            .with_rule(Arc::new(FailingRule));
        let outcome = evaluator
            .evaluate(&PolicyRequest::new(OperationKind::Store, Tier::Working))
            .await;

        assert!(outcome.failed);
        assert!(outcome.is_denied());
        assert!(outcome.final_reason().unwrap().contains("backend unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_uses_failure_mode() {
        let config = PolicyConfig {
            timeout_ms: 50,
            ..PolicyConfig::default()
        };
        let evaluator = PolicyEvaluator::new(&config)
            .unwrap()
            .with_rule(Arc::new(SlowRule));
        let outcome = evaluator
            .evaluate(&PolicyRequest::new(OperationKind::Search, Tier::Semantic))
            .await;

        assert!(outcome.failed);
        assert_eq!(outcome.final_action, PolicyAction::Allow);
        assert!(outcome.decisions[0].reason.contains("timed out after 50ms"));
    }

    #[tokio::test]
    async fn test_strict_safety_denies_ssn() {
        let mut config = PolicyConfig::default();
        config.safety.enabled = true;
        config.safety.mode = SafetyMode::Strict;
        let evaluator = PolicyEvaluator::new(&config).unwrap();

        let outcome = evaluator
            .evaluate(
                &PolicyRequest::new(OperationKind::Store, Tier::Working)
                    .with_content("SSN 123-45-6789"),
            )
            .await;

        assert_eq!(outcome.final_action, PolicyAction::Deny);
        assert!(
            outcome
                .decisions
                .iter()
                .any(|d| d.rule_id == "safety-pii" && d.action == PolicyAction::Deny)
        );
    }
}
