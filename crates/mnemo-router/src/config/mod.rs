use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::Semaphore;

use crate::error::{MnemoError, Result};
use crate::memory::types::{FallbackStrategy, OperationKind, Tier};

/// Main configuration structure for the Mnemo router
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Routing, fallback and admission settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// Content analysis (intent, entities, sentiment)
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Retention, compression, safety and access rules
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Duplicate-operation replay cache
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    /// Latency sampling
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| MnemoError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MnemoError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject configurations that cannot be run. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        self.analysis.validate()?;
        self.policy.validate()?;
        self.idempotency.validate()?;
        self.telemetry.validate()?;
        Ok(())
    }
}

/// Scoring aggregation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingAlgorithm {
    /// Use only the first enabled scoring function
    Simple,
    /// Weight-normalized mean of every enabled scoring function
    #[default]
    Weighted,
    /// No trained model ships with the router; degrades to `Weighted`
    MlBased,
}

impl RoutingAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            RoutingAlgorithm::Simple => "simple",
            RoutingAlgorithm::Weighted => "weighted",
            RoutingAlgorithm::MlBased => "ml-based",
        }
    }
}

/// Routing and admission configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// When false, every operation is sent to `default_tier` unscored
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: RoutingAlgorithm,
    #[serde(default)]
    pub fallback_strategy: FallbackStrategy,
    /// Decisions below this confidence are treated as uncertain (0.0-1.0)
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Maximum time to wait for an admission permit
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Tier used when routing is bypassed or fails
    #[serde(default = "default_tier")]
    pub default_tier: Tier,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Ordered scoring functions
    #[serde(default = "default_scoring_functions")]
    pub scoring: Vec<ScoringFunctionConfig>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            algorithm: RoutingAlgorithm::default(),
            fallback_strategy: FallbackStrategy::default(),
            confidence_threshold: default_confidence_threshold(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            default_tier: default_tier(),
            concurrency: ConcurrencyConfig::default(),
            scoring: default_scoring_functions(),
        }
    }
}

impl OrchestratorConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(MnemoError::Config(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.acquire_timeout_ms == 0 {
            return Err(MnemoError::Config(
                "acquire_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.concurrency.validate()?;

        for function in &self.scoring {
            if !crate::scoring::KNOWN_FUNCTIONS.contains(&function.name.as_str()) {
                return Err(MnemoError::Config(format!(
                    "unknown scoring function '{}'",
                    function.name
                )));
            }
            if !function.weight.is_finite() || function.weight < 0.0 {
                return Err(MnemoError::Config(format!(
                    "scoring function '{}' has invalid weight {}",
                    function.name, function.weight
                )));
            }
        }
        if !self
            .scoring
            .iter()
            .any(|f| f.enabled && f.weight > 0.0)
        {
            return Err(MnemoError::Config(
                "at least one scoring function must be enabled with a positive weight".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_enabled() -> bool {
    true
}

fn default_confidence_threshold() -> f32 {
    0.6
}

fn default_acquire_timeout_ms() -> u64 {
    5000
}

fn default_tier() -> Tier {
    Tier::Working
}

fn default_scoring_functions() -> Vec<ScoringFunctionConfig> {
    vec![ScoringFunctionConfig {
        name: "heuristic".to_string(),
        weight: 1.0,
        enabled: true,
        parameters: HashMap::new(),
    }]
}

/// Concurrency ceilings for admission control
#[derive(Debug, Clone, Deserialize)]
pub struct ConcurrencyConfig {
    /// In-flight permits per tier; every tier needs a ceiling
    #[serde(default = "default_per_tier")]
    pub per_tier: HashMap<Tier, usize>,
    /// In-flight permits per operation kind; omitted kinds are unbounded
    #[serde(default = "default_per_operation")]
    pub per_operation: HashMap<OperationKind, usize>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            per_tier: default_per_tier(),
            per_operation: default_per_operation(),
        }
    }
}

impl ConcurrencyConfig {
    fn validate(&self) -> Result<()> {
        for tier in Tier::ALL {
            let Some(&limit) = self.per_tier.get(&tier) else {
                return Err(MnemoError::Config(format!(
                    "missing concurrency ceiling for tier '{tier}'"
                )));
            };
            check_ceiling(&format!("tier '{tier}'"), limit)?;
        }
        for (op, &limit) in &self.per_operation {
            check_ceiling(&format!("operation '{op}'"), limit)?;
        }
        Ok(())
    }
}

fn check_ceiling(resource: &str, limit: usize) -> Result<()> {
    if limit == 0 {
        return Err(MnemoError::Config(format!(
            "concurrency ceiling for {resource} must be greater than zero"
        )));
    }
    if limit > Semaphore::MAX_PERMITS {
        return Err(MnemoError::Config(format!(
            "concurrency ceiling for {resource} must be at most {}, got {limit}",
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(())
}

fn default_per_tier() -> HashMap<Tier, usize> {
    HashMap::from([
        (Tier::Working, 32),
        (Tier::Episodic, 16),
        (Tier::Semantic, 16),
        (Tier::Shared, 8),
    ])
}

fn default_per_operation() -> HashMap<OperationKind, usize> {
    HashMap::from([
        (OperationKind::Store, 16),
        (OperationKind::Retrieve, 32),
        (OperationKind::Search, 16),
        (OperationKind::Update, 16),
        (OperationKind::Delete, 8),
        (OperationKind::Compress, 2),
    ])
}

/// One entry in the scoring function list
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringFunctionConfig {
    /// Registered strategy name: heuristic, latency or consistency
    pub name: String,
    #[serde(default = "default_scoring_weight")]
    pub weight: f32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Strategy-specific numeric parameters
    #[serde(default)]
    pub parameters: HashMap<String, f64>,
}

fn default_scoring_weight() -> f32 {
    1.0
}

/// Content analysis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Entities below this confidence are dropped (0.0-1.0)
    #[serde(default = "default_min_entity_confidence")]
    pub min_entity_confidence: f32,
    #[serde(default = "default_max_entities")]
    pub max_entities: usize,
    /// Content beyond this many characters is not analyzed
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_entity_confidence: default_min_entity_confidence(),
            max_entities: default_max_entities(),
            max_content_length: default_max_content_length(),
        }
    }
}

impl AnalysisConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_entity_confidence) {
            return Err(MnemoError::Config(format!(
                "analysis.min_entity_confidence must be within [0, 1], got {}",
                self.min_entity_confidence
            )));
        }
        Ok(())
    }
}

fn default_min_entity_confidence() -> f32 {
    0.5
}

fn default_max_entities() -> usize {
    10
}

fn default_max_content_length() -> usize {
    10_000
}

/// What the evaluator returns when rule evaluation itself fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyFailureMode {
    /// Emit a single allow decision
    #[default]
    FailOpen,
    /// Emit a single deny decision
    FailClosed,
}

/// Policy evaluation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Upper bound on one evaluation
    #[serde(default = "default_policy_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub failure_mode: PolicyFailureMode,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub access: AccessControlConfig,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            timeout_ms: default_policy_timeout_ms(),
            failure_mode: PolicyFailureMode::default(),
            retention: RetentionConfig::default(),
            compression: CompressionConfig::default(),
            safety: SafetyConfig::default(),
            access: AccessControlConfig::default(),
        }
    }
}

impl PolicyConfig {
    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(MnemoError::Config(
                "policy.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.compression.enabled && self.compression.threshold_chars == 0 {
            return Err(MnemoError::Config(
                "policy.compression.threshold_chars must be greater than zero".to_string(),
            ));
        }
        for pattern in &self.safety.patterns {
            Regex::new(&pattern.pattern).map_err(|e| {
                MnemoError::Config(format!(
                    "invalid safety pattern '{}': {}",
                    pattern.name, e
                ))
            })?;
        }
        Ok(())
    }
}

fn default_policy_timeout_ms() -> u64 {
    1000
}

/// Retention period table
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_retention_days")]
    pub default_days: u32,
    /// Retention days keyed by content type
    #[serde(default = "default_retention_by_content_type")]
    pub by_content_type: HashMap<String, u32>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            default_days: default_retention_days(),
            by_content_type: default_retention_by_content_type(),
        }
    }
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_by_content_type() -> HashMap<String, u32> {
    HashMap::from([
        ("conversation".to_string(), 90),
        ("fact".to_string(), 365),
        ("scratch".to_string(), 1),
    ])
}

/// Compression trigger
#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Content at or above this many characters is flagged for compression
    #[serde(default = "default_compression_threshold")]
    pub threshold_chars: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            threshold_chars: default_compression_threshold(),
        }
    }
}

fn default_compression_threshold() -> usize {
    2000
}

/// How safety matches are acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyMode {
    /// Deny the operation
    #[default]
    Strict,
    /// Allow the operation but require redaction
    Passive,
}

/// Sensitive-content scanning
#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: SafetyMode,
    #[serde(default = "default_redaction_patterns")]
    pub patterns: Vec<RedactionPattern>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: SafetyMode::default(),
            patterns: default_redaction_patterns(),
        }
    }
}

/// A named regular expression that marks content as sensitive
#[derive(Debug, Clone, Deserialize)]
pub struct RedactionPattern {
    pub name: String,
    pub pattern: String,
}

impl RedactionPattern {
    pub fn new(name: &str, pattern: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
        }
    }
}

fn default_redaction_patterns() -> Vec<RedactionPattern> {
    vec![
        RedactionPattern::new("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
        RedactionPattern::new("credit_card", r"\b(?:\d{4}[- ]?){3}\d{4}\b"),
        RedactionPattern::new("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
    ]
}

/// Tier/operation access lists
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AccessControlConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Deny operations that carry no user id
    #[serde(default)]
    pub require_auth: bool,
    /// When a tier has an entry, only the listed operations are allowed on it
    #[serde(default)]
    pub allow: HashMap<Tier, Vec<OperationKind>>,
    /// Operations always denied on a tier
    #[serde(default)]
    pub deny: HashMap<Tier, Vec<OperationKind>>,
}

/// Idempotency cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_idempotency_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_idempotency_max_entries")]
    pub max_entries: usize,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ttl_secs: default_idempotency_ttl_secs(),
            max_entries: default_idempotency_max_entries(),
        }
    }
}

impl IdempotencyConfig {
    fn validate(&self) -> Result<()> {
        if self.max_entries == 0 {
            return Err(MnemoError::Config(
                "idempotency.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.ttl_secs == 0 {
            return Err(MnemoError::Config(
                "idempotency.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.ttl_secs > MAX_IDEMPOTENCY_TTL_SECS {
            return Err(MnemoError::Config(format!(
                "idempotency.ttl_secs must be at most {MAX_IDEMPOTENCY_TTL_SECS}, got {}",
                self.ttl_secs
            )));
        }
        Ok(())
    }
}

/// Longest accepted replay window (30 days)
pub const MAX_IDEMPOTENCY_TTL_SECS: u64 = 30 * 24 * 60 * 60;

fn default_idempotency_ttl_secs() -> u64 {
    300
}

fn default_idempotency_max_entries() -> usize {
    10_000
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Fraction of latency samples kept (0.0-1.0); counters are always exact
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f32,
    /// Number of recent latency samples kept per window
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            latency_window: default_latency_window(),
        }
    }
}

impl TelemetryConfig {
    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sample_rate) {
            return Err(MnemoError::Config(format!(
                "telemetry.sample_rate must be within [0, 1], got {}",
                self.sample_rate
            )));
        }
        if self.latency_window == 0 {
            return Err(MnemoError::Config(
                "telemetry.latency_window must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_sample_rate() -> f32 {
    1.0
}

fn default_latency_window() -> usize {
    1024
}
