//! Tier store contract
//!
//! The router never interprets tier-store errors: whatever a store reports
//! in `OperationResult::error` is passed through unchanged.

pub mod memory;

pub use memory::{InMemoryTierStore, StoredEntry};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::memory::types::{OperationKind, OperationResult, RoutingContext, Tier};

/// Registered store per tier
pub type TierStores = HashMap<Tier, Arc<dyn TierStore>>;

/// Default number of search hits returned by [`dispatch`]
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

/// How a store should shrink its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum CompressionStrategy {
    /// Cut content longer than `max_chars` at a character boundary
    Truncate { max_chars: usize },
}

impl Default for CompressionStrategy {
    fn default() -> Self {
        CompressionStrategy::Truncate { max_chars: 2000 }
    }
}

/// Entries older than `max_age_days` are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
}

/// Size and age summary of a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub entry_count: usize,
    /// Bytes of stored content
    pub total_size: usize,
    pub oldest: Option<chrono::DateTime<chrono::Utc>>,
    pub newest: Option<chrono::DateTime<chrono::Utc>>,
    /// Stored bytes / original bytes; 1.0 when nothing was compressed
    pub compression_ratio: f64,
}

/// A memory tier backend
#[async_trait]
pub trait TierStore: Send + Sync {
    fn tier(&self) -> Tier;

    async fn read(&self, key: &str, ctx: &RoutingContext) -> OperationResult;

    /// Store `ctx.content` under `key`
    async fn write(&self, key: &str, ctx: &RoutingContext) -> OperationResult;

    /// Replace the content under an existing `key`
    async fn update(&self, key: &str, ctx: &RoutingContext) -> OperationResult;

    async fn delete(&self, key: &str, ctx: &RoutingContext) -> OperationResult;

    async fn search(&self, query: &str, ctx: &RoutingContext, limit: usize) -> OperationResult;

    async fn list(&self, ctx: &RoutingContext, limit: usize, offset: usize) -> OperationResult;

    async fn compress(&self, strategy: CompressionStrategy) -> OperationResult;

    async fn apply_retention(&self, policy: RetentionPolicy) -> OperationResult;

    /// Payload is a serialized [`StoreStats`]
    async fn stats(&self) -> OperationResult;

    async fn is_healthy(&self) -> bool;
}

/// Run the operation described by `ctx` against `store`, measuring its latency
pub async fn dispatch(store: &dyn TierStore, ctx: &RoutingContext) -> OperationResult {
    let tier = store.tier();
    let started = Instant::now();
    let key = ctx.metadata.key.as_deref();

    let result = match (ctx.operation, key) {
        (OperationKind::Store, Some(key)) => store.write(key, ctx).await,
        (OperationKind::Store, None) => {
            let generated = uuid::Uuid::new_v4().to_string();
            store.write(&generated, ctx).await
        }
        (OperationKind::Retrieve, Some(key)) => store.read(key, ctx).await,
        (OperationKind::Retrieve, None) => store.list(ctx, DEFAULT_SEARCH_LIMIT, 0).await,
        (OperationKind::Search, _) => {
            let query = ctx.content.as_deref().unwrap_or_default();
            store.search(query, ctx, DEFAULT_SEARCH_LIMIT).await
        }
        (OperationKind::Update, Some(key)) => store.update(key, ctx).await,
        (OperationKind::Delete, Some(key)) => store.delete(key, ctx).await,
        (op @ (OperationKind::Update | OperationKind::Delete), None) => {
            OperationResult::failed(tier, op, format!("{op} requires a key"))
        }
        (OperationKind::Compress, _) => store.compress(CompressionStrategy::default()).await,
        (OperationKind::Health, _) => {
            let healthy = store.is_healthy().await;
            OperationResult::ok(
                tier,
                OperationKind::Health,
                Some(serde_json::json!({ "healthy": healthy })),
            )
        }
        (OperationKind::Stats, _) => store.stats().await,
    };

    result.with_latency(started.elapsed().as_secs_f64() * 1000.0)
}
