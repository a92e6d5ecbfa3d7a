//! Test utilities for the router - fixtures and mocks
//!
//! - Orchestrator and store fixtures wired with in-memory tier stores
//! - A store that fails every call, for fallback paths
//! - A fixed-output scoring function, for scorer failure paths

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::config::Config;
use crate::memory::types::{OperationKind, OperationResult, RoutingContext, ScoringResult, Tier};
use crate::orchestrator::MemoryOrchestrator;
use crate::scoring::ScoringFunction;
use crate::store::{CompressionStrategy, InMemoryTierStore, RetentionPolicy, TierStore, TierStores};

/// Build and initialize an orchestrator. Panics on invalid config.
pub fn running_orchestrator(config: Config) -> MemoryOrchestrator {
    let orchestrator =
        MemoryOrchestrator::new(config).expect("Failed to build orchestrator for tests");
    orchestrator
        .initialize()
        .expect("Failed to initialize orchestrator for tests");
    orchestrator
}

/// One empty in-memory store per tier
pub fn in_memory_stores() -> TierStores {
    Tier::ALL
        .into_iter()
        .map(|tier| (tier, Arc::new(InMemoryTierStore::new(tier)) as Arc<dyn TierStore>))
        .collect()
}

pub fn store_ctx(content: &str) -> RoutingContext {
    RoutingContext::new(OperationKind::Store).with_content(content)
}

pub fn search_ctx(query: &str) -> RoutingContext {
    RoutingContext::new(OperationKind::Search).with_content(query)
}

/// Tier store whose every operation fails with the same error.
/// Reports itself healthy so the failure happens inside the operation.
#[derive(Debug)]
pub struct FailingStore {
    tier: Tier,
    error: String,
    calls: AtomicU64,
}

impl FailingStore {
    pub fn new(tier: Tier, error: impl Into<String>) -> Self {
        Self {
            tier,
            error: error.into(),
            calls: AtomicU64::new(0),
        }
    }

    /// Number of operations attempted against this store
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn fail(&self, operation: OperationKind) -> OperationResult {
        self.calls.fetch_add(1, Ordering::Relaxed);
        OperationResult::failed(self.tier, operation, self.error.clone())
    }
}

#[async_trait]
impl TierStore for FailingStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn read(&self, _key: &str, _ctx: &RoutingContext) -> OperationResult {
        self.fail(OperationKind::Retrieve)
    }

    async fn write(&self, _key: &str, _ctx: &RoutingContext) -> OperationResult {
        self.fail(OperationKind::Store)
    }

    async fn update(&self, _key: &str, _ctx: &RoutingContext) -> OperationResult {
        self.fail(OperationKind::Update)
    }

    async fn delete(&self, _key: &str, _ctx: &RoutingContext) -> OperationResult {
        self.fail(OperationKind::Delete)
    }

    async fn search(&self, _query: &str, _ctx: &RoutingContext, _limit: usize) -> OperationResult {
        self.fail(OperationKind::Search)
    }

    async fn list(&self, _ctx: &RoutingContext, _limit: usize, _offset: usize) -> OperationResult {
        self.fail(OperationKind::Retrieve)
    }

    async fn compress(&self, _strategy: CompressionStrategy) -> OperationResult {
        self.fail(OperationKind::Compress)
    }

    async fn apply_retention(&self, _policy: RetentionPolicy) -> OperationResult {
        self.fail(OperationKind::Delete)
    }

    async fn stats(&self) -> OperationResult {
        self.fail(OperationKind::Stats)
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Scoring function that gives every tier the same score.
/// A NaN score makes the scorer fail, which exercises the fallback path.
#[derive(Debug, Clone)]
pub struct FixedScoring {
    score: f32,
}

impl FixedScoring {
    pub fn new(score: f32) -> Self {
        Self { score }
    }
}

impl ScoringFunction for FixedScoring {
    fn name(&self) -> &str {
        "fixed"
    }

    fn weight(&self) -> f32 {
        1.0
    }

    fn score(&self, _ctx: &RoutingContext, tier: Tier) -> ScoringResult {
        let mut result = ScoringResult::new(tier, 0.0, 0.5);
        result.score = self.score;
        result
    }
}
