//! Built-in policy rule families

use async_trait::async_trait;
use regex::Regex;

use super::{PolicyAction, PolicyDecision, PolicyError, PolicyRequest};
use crate::config::{AccessControlConfig, RetentionConfig, SafetyConfig, SafetyMode};
use crate::error::{MnemoError, Result};

/// A single rule family
///
/// Rules return at most one decision. An error aborts the whole evaluation
/// and hands control to the evaluator's failure mode.
#[async_trait]
pub trait PolicyRule: Send + Sync {
    /// Stable identifier reported in decisions
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    async fn evaluate(
        &self,
        request: &PolicyRequest<'_>,
    ) -> std::result::Result<Option<PolicyDecision>, PolicyError>;
}

/// Always emits a retain decision carrying the retention period
pub struct RetentionRule {
    config: RetentionConfig,
}

impl RetentionRule {
    pub const ID: &'static str = "retention-policy";

    pub fn new(config: RetentionConfig) -> Self {
        Self { config }
    }

    /// Retention days for a content type, and whether the table had an entry
    pub fn retention_days(&self, content_type: Option<&str>) -> (u32, bool) {
        content_type
            .and_then(|ct| self.config.by_content_type.get(ct))
            .map(|days| (*days, true))
            .unwrap_or((self.config.default_days, false))
    }
}

#[async_trait]
impl PolicyRule for RetentionRule {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Retention period"
    }

    async fn evaluate(
        &self,
        request: &PolicyRequest<'_>,
    ) -> std::result::Result<Option<PolicyDecision>, PolicyError> {
        let (days, matched) = self.retention_days(request.content_type);
        let confidence = if matched { 1.0 } else { 0.8 };
        let reason = match request.content_type {
            Some(ct) if matched => format!("retain {ct} content for {days} days"),
            _ => format!("retain for default {days} days"),
        };

        let mut decision =
            PolicyDecision::new(Self::ID, self.name(), PolicyAction::Retain, confidence, reason)
                .with_metadata("retention_days", days);
        if let Some(ct) = request.content_type {
            decision = decision.with_metadata("content_type", ct);
        }
        Ok(Some(decision))
    }
}

/// Flags long content for compression
pub struct CompressionRule {
    threshold_chars: usize,
}

impl CompressionRule {
    pub const ID: &'static str = "compression-threshold";

    pub fn new(threshold_chars: usize) -> Self {
        Self { threshold_chars }
    }
}

#[async_trait]
impl PolicyRule for CompressionRule {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Compression threshold"
    }

    async fn evaluate(
        &self,
        request: &PolicyRequest<'_>,
    ) -> std::result::Result<Option<PolicyDecision>, PolicyError> {
        let length = request.content.map(|c| c.chars().count()).unwrap_or(0);
        if length < self.threshold_chars {
            return Ok(None);
        }

        Ok(Some(
            PolicyDecision::new(
                Self::ID,
                self.name(),
                PolicyAction::Compress,
                0.8,
                format!(
                    "content length {length} reaches compression threshold {}",
                    self.threshold_chars
                ),
            )
            .with_metadata("content_length", length)
            .with_metadata("threshold", self.threshold_chars),
        ))
    }
}

/// Scans content against sensitive-data patterns
pub struct SafetyRule {
    mode: SafetyMode,
    patterns: Vec<(String, Regex)>,
}

impl SafetyRule {
    pub const ID: &'static str = "safety-pii";

    pub fn new(config: &SafetyConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|re| (p.name.clone(), re))
                    .map_err(|e| {
                        MnemoError::Config(format!("invalid safety pattern '{}': {}", p.name, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            mode: config.mode,
            patterns,
        })
    }

    /// Names of the patterns that match `text`
    pub fn matches(&self, text: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[async_trait]
impl PolicyRule for SafetyRule {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Sensitive data scan"
    }

    async fn evaluate(
        &self,
        request: &PolicyRequest<'_>,
    ) -> std::result::Result<Option<PolicyDecision>, PolicyError> {
        let Some(content) = request.content else {
            return Ok(None);
        };
        let matched = self.matches(content);
        if matched.is_empty() {
            return Ok(None);
        }

        let action = match self.mode {
            SafetyMode::Strict => PolicyAction::Deny,
            SafetyMode::Passive => PolicyAction::Redact,
        };
        let reason = format!("content matches sensitive patterns: {}", matched.join(", "));
        Ok(Some(
            PolicyDecision::new(Self::ID, self.name(), action, 0.9, reason)
                .with_metadata("patterns", matched),
        ))
    }
}

/// Tier/operation allow and deny lists plus the authentication requirement
pub struct AccessControlRule {
    config: AccessControlConfig,
}

impl AccessControlRule {
    pub const ID: &'static str = "access-control";

    pub fn new(config: AccessControlConfig) -> Self {
        Self { config }
    }

    fn violation(&self, request: &PolicyRequest<'_>) -> Option<String> {
        if self.config.require_auth && request.user_id.is_none() {
            return Some("authentication required".to_string());
        }
        if self
            .config
            .deny
            .get(&request.tier)
            .is_some_and(|ops| ops.contains(&request.operation))
        {
            return Some(format!(
                "{} is denied on the {} tier",
                request.operation, request.tier
            ));
        }
        if self
            .config
            .allow
            .get(&request.tier)
            .is_some_and(|ops| !ops.contains(&request.operation))
        {
            return Some(format!(
                "{} is not in the allow list for the {} tier",
                request.operation, request.tier
            ));
        }
        None
    }
}

#[async_trait]
impl PolicyRule for AccessControlRule {
    fn id(&self) -> &str {
        Self::ID
    }

    fn name(&self) -> &str {
        "Access control"
    }

    async fn evaluate(
        &self,
        request: &PolicyRequest<'_>,
    ) -> std::result::Result<Option<PolicyDecision>, PolicyError> {
        Ok(self.violation(request).map(|reason| {
            PolicyDecision::new(Self::ID, self.name(), PolicyAction::Deny, 1.0, reason)
                .with_metadata("tier", request.tier.as_str())
        }))
    }
}
