//! Memory routing types for the Mnemo system
//!
//! Defines the tiers a memory operation can be routed to, the immutable
//! routing input, and the explainable outputs of scoring and routing.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::ContextAnalysis;
use crate::policy::{PolicyAction, PolicyDecision};

/// A memory store that can serve an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Short-lived scratch memory for the active conversation
    Working,
    /// What happened (conversations, events)
    Episodic,
    /// Facts and knowledge
    Semantic,
    /// Memory shared across agents or sessions
    Shared,
}

impl Tier {
    /// All tiers in tie-break precedence order
    pub const ALL: [Tier; 4] = [Tier::Working, Tier::Episodic, Tier::Semantic, Tier::Shared];

    /// Position in the tie-break order (lower wins)
    pub fn precedence(self) -> usize {
        match self {
            Tier::Working => 0,
            Tier::Episodic => 1,
            Tier::Semantic => 2,
            Tier::Shared => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Working => "working",
            Tier::Episodic => "episodic",
            Tier::Semantic => "semantic",
            Tier::Shared => "shared",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "working" => Ok(Tier::Working),
            "episodic" => Ok(Tier::Episodic),
            "semantic" => Ok(Tier::Semantic),
            "shared" => Ok(Tier::Shared),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Kind of memory operation being routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Store,
    Retrieve,
    Search,
    Update,
    Delete,
    Compress,
    Health,
    Stats,
}

impl OperationKind {
    pub const ALL: [OperationKind; 8] = [
        OperationKind::Store,
        OperationKind::Retrieve,
        OperationKind::Search,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::Compress,
        OperationKind::Health,
        OperationKind::Stats,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Store => "store",
            OperationKind::Retrieve => "retrieve",
            OperationKind::Search => "search",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Compress => "compress",
            OperationKind::Health => "health",
            OperationKind::Stats => "stats",
        }
    }

    /// Whether the operation changes stored data
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            OperationKind::Store
                | OperationKind::Update
                | OperationKind::Delete
                | OperationKind::Compress
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OperationKind::ALL
            .into_iter()
            .find(|op| op.as_str() == s.to_lowercase())
            .ok_or_else(|| format!("unknown operation: {s}"))
    }
}

/// How quickly the caller needs the operation served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Read-after-write guarantee the caller requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    #[default]
    Eventual,
    Strong,
}

/// Optional caller hints that steer routing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserHints {
    pub preferred_tier: Option<Tier>,
    pub urgency: Option<Urgency>,
    pub consistency: Option<ConsistencyLevel>,
}

/// Identifiers and timing attached to a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetadata {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Caller-supplied request id, echoed into the decision metadata
    pub request_id: Option<String>,
    /// Content type used to pick a retention period (e.g. "conversation")
    pub content_type: Option<String>,
    /// Storage key the operation targets, when it has one
    pub key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Default for RequestMetadata {
    fn default() -> Self {
        Self {
            session_id: None,
            user_id: None,
            conversation_id: None,
            request_id: None,
            content_type: None,
            key: None,
            timestamp: Utc::now(),
        }
    }
}

/// Immutable input describing one memory operation to route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingContext {
    pub operation: OperationKind,
    /// Raw content (for writes) or query string (for reads and searches)
    pub content: Option<String>,
    /// Pre-computed analysis; the router fills this in when analysis is enabled
    pub analysis: Option<ContextAnalysis>,
    pub hints: UserHints,
    pub metadata: RequestMetadata,
}

impl RoutingContext {
    pub fn new(operation: OperationKind) -> Self {
        Self {
            operation,
            content: None,
            analysis: None,
            hints: UserHints::default(),
            metadata: RequestMetadata::default(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_hints(mut self, hints: UserHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_preferred_tier(mut self, tier: Tier) -> Self {
        self.hints.preferred_tier = Some(tier);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.hints.urgency = Some(urgency);
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.hints.consistency = Some(consistency);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.metadata.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.metadata.session_id = Some(session_id.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.metadata.key = Some(key.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata.content_type = Some(content_type.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.metadata.request_id = Some(request_id.into());
        self
    }

    /// Content length in characters (0 when absent)
    pub fn content_len(&self) -> usize {
        self.content.as_deref().map(|c| c.chars().count()).unwrap_or(0)
    }
}

/// One named signal that contributed to a tier's score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringFeature {
    pub name: String,
    /// Raw value of the signal (a bonus, a multiplier, a measurement)
    pub value: f32,
    pub weight: f32,
    /// Net effect on the score
    pub contribution: f32,
}

impl ScoringFeature {
    pub fn new(name: impl Into<String>, value: f32, weight: f32, contribution: f32) -> Self {
        Self {
            name: name.into(),
            value,
            weight,
            contribution,
        }
    }
}

/// A tier's candidacy score with an explainable breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub tier: Tier,
    /// Normalized score in [0, 1]
    pub score: f32,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub features: Vec<ScoringFeature>,
    pub reasoning: Vec<String>,
}

impl ScoringResult {
    pub fn new(tier: Tier, score: f32, confidence: f32) -> Self {
        Self {
            tier,
            score: score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            features: Vec::new(),
            reasoning: Vec::new(),
        }
    }
}

/// What to do when the primary tier is unavailable or low-confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    None,
    SingleTier,
    #[default]
    Cascade,
    Parallel,
    Intelligent,
}

/// Fallback strategy plus the ordered tiers it applies to
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FallbackPlan {
    pub strategy: FallbackStrategy,
    pub tiers: Vec<Tier>,
}

impl FallbackPlan {
    pub fn none() -> Self {
        Self {
            strategy: FallbackStrategy::None,
            tiers: Vec::new(),
        }
    }
}

/// Terminal state of a routing call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Scored and selected normally
    Decided,
    /// Blocked by policy; no tier may serve the operation
    Denied,
    /// An internal failure forced the default tier
    Fallback,
    /// Routing is disabled; the default tier was used without scoring
    Bypassed,
}

/// Provenance of a routing decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionMetadata {
    pub algorithm: String,
    pub version: String,
    pub correlation_id: Uuid,
    pub request_id: Option<String>,
    pub session_id: Option<String>,
    pub decided_at: DateTime<Utc>,
    pub duration_us: u64,
}

/// Terminal output of a routing call; never mutated after creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub status: DecisionStatus,
    /// `None` only when the decision is `Denied`
    pub primary_tier: Option<Tier>,
    pub fallback: FallbackPlan,
    pub reasoning: String,
    pub confidence: f32,
    pub estimated_latency_ms: f64,
    pub features: Vec<ScoringFeature>,
    /// Resolved policy outcome the caller must honor (redact, compress, ...)
    pub final_action: PolicyAction,
    pub policy_decisions: Vec<PolicyDecision>,
    pub metadata: DecisionMetadata,
}

impl RoutingDecision {
    pub fn is_denied(&self) -> bool {
        self.status == DecisionStatus::Denied
    }
}

/// Metadata attached to every tier-store result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    pub tier: Tier,
    pub operation: OperationKind,
    pub latency_ms: f64,
    /// Advisory policy action attached by the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_action: Option<PolicyAction>,
}

/// Uniform result of an operation against a tier store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: OperationMetadata,
}

impl OperationResult {
    pub fn ok(tier: Tier, operation: OperationKind, payload: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            metadata: OperationMetadata {
                tier,
                operation,
                latency_ms: 0.0,
                policy_action: None,
            },
        }
    }

    pub fn failed(tier: Tier, operation: OperationKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.into()),
            metadata: OperationMetadata {
                tier,
                operation,
                latency_ms: 0.0,
                policy_action: None,
            },
        }
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.metadata.latency_ms = latency_ms;
        self
    }

    pub fn with_policy_action(mut self, action: Option<PolicyAction>) -> Self {
        self.metadata.policy_action = action;
        self
    }
}
