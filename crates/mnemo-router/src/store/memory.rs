//! In-memory tier store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CompressionStrategy, RetentionPolicy, StoreStats, TierStore};
use crate::memory::types::{OperationKind, OperationResult, RoutingContext, Tier};

/// One stored memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: String,
    pub content: String,
    pub content_type: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Content size in bytes before any compression
    pub original_size: usize,
}

impl StoredEntry {
    fn from_context(key: &str, ctx: &RoutingContext) -> Self {
        let content = ctx.content.clone().unwrap_or_default();
        let now = Utc::now();
        Self {
            key: key.to_string(),
            original_size: content.len(),
            content,
            content_type: ctx.metadata.content_type.clone(),
            session_id: ctx.metadata.session_id.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// HashMap-backed store for one tier
#[derive(Debug)]
pub struct InMemoryTierStore {
    tier: Tier,
    entries: RwLock<HashMap<String, StoredEntry>>,
    healthy: AtomicBool,
}

impl InMemoryTierStore {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            entries: RwLock::new(HashMap::new()),
            healthy: AtomicBool::new(true),
        }
    }

    /// Toggle the health flag reported by `is_healthy`
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Insert a fully formed entry, keeping its timestamps
    pub async fn insert_entry(&self, entry: StoredEntry) {
        self.entries.write().await.insert(entry.key.clone(), entry);
    }

    fn ok(&self, operation: OperationKind, payload: serde_json::Value) -> OperationResult {
        OperationResult::ok(self.tier, operation, Some(payload))
    }

    fn failed(&self, operation: OperationKind, error: impl Into<String>) -> OperationResult {
        OperationResult::failed(self.tier, operation, error)
    }

    fn entry_json(entry: &StoredEntry) -> serde_json::Value {
        serde_json::to_value(entry).unwrap_or(serde_json::Value::Null)
    }

    fn sorted(entries: &HashMap<String, StoredEntry>) -> Vec<&StoredEntry> {
        let mut sorted: Vec<&StoredEntry> = entries.values().collect();
        sorted.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        sorted
    }
}

#[async_trait]
impl TierStore for InMemoryTierStore {
    fn tier(&self) -> Tier {
        self.tier
    }

    async fn read(&self, key: &str, _ctx: &RoutingContext) -> OperationResult {
        match self.entries.read().await.get(key) {
            Some(entry) => self.ok(OperationKind::Retrieve, Self::entry_json(entry)),
            None => self.failed(OperationKind::Retrieve, format!("key '{key}' not found")),
        }
    }

    async fn write(&self, key: &str, ctx: &RoutingContext) -> OperationResult {
        let entry = StoredEntry::from_context(key, ctx);
        let size = entry.original_size;
        self.entries.write().await.insert(key.to_string(), entry);
        debug!(tier = %self.tier, key = key, size, "Entry stored");
        self.ok(
            OperationKind::Store,
            serde_json::json!({ "key": key, "size": size }),
        )
    }

    async fn update(&self, key: &str, ctx: &RoutingContext) -> OperationResult {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key) else {
            return self.failed(OperationKind::Update, format!("key '{key}' not found"));
        };
        entry.content = ctx.content.clone().unwrap_or_default();
        entry.original_size = entry.content.len();
        entry.updated_at = Utc::now();
        if ctx.metadata.content_type.is_some() {
            entry.content_type = ctx.metadata.content_type.clone();
        }
        self.ok(
            OperationKind::Update,
            serde_json::json!({ "key": key, "size": entry.original_size }),
        )
    }

    async fn delete(&self, key: &str, _ctx: &RoutingContext) -> OperationResult {
        match self.entries.write().await.remove(key) {
            Some(_) => self.ok(OperationKind::Delete, serde_json::json!({ "key": key })),
            None => self.failed(OperationKind::Delete, format!("key '{key}' not found")),
        }
    }

    async fn search(&self, query: &str, _ctx: &RoutingContext, limit: usize) -> OperationResult {
        let needle = query.to_lowercase();
        let entries = self.entries.read().await;
        let hits: Vec<serde_json::Value> = Self::sorted(&entries)
            .into_iter()
            .filter(|e| e.content.to_lowercase().contains(&needle))
            .take(limit)
            .map(Self::entry_json)
            .collect();
        self.ok(
            OperationKind::Search,
            serde_json::json!({ "count": hits.len(), "entries": hits }),
        )
    }

    async fn list(&self, _ctx: &RoutingContext, limit: usize, offset: usize) -> OperationResult {
        let entries = self.entries.read().await;
        let page: Vec<serde_json::Value> = Self::sorted(&entries)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(Self::entry_json)
            .collect();
        self.ok(
            OperationKind::Retrieve,
            serde_json::json!({ "total": entries.len(), "entries": page }),
        )
    }

    async fn compress(&self, strategy: CompressionStrategy) -> OperationResult {
        let CompressionStrategy::Truncate { max_chars } = strategy;
        let mut entries = self.entries.write().await;
        let mut compressed = 0usize;
        for entry in entries.values_mut() {
            if let Some((cut, _)) = entry.content.char_indices().nth(max_chars) {
                entry.content.truncate(cut);
                entry.updated_at = Utc::now();
                compressed += 1;
            }
        }
        debug!(tier = %self.tier, compressed, "Entries compressed");
        self.ok(
            OperationKind::Compress,
            serde_json::json!({ "compressed": compressed }),
        )
    }

    async fn apply_retention(&self, policy: RetentionPolicy) -> OperationResult {
        let cutoff = Utc::now() - Duration::days(i64::from(policy.max_age_days));
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.created_at > cutoff);
        let removed = before - entries.len();
        debug!(tier = %self.tier, removed, "Retention applied");
        self.ok(
            OperationKind::Delete,
            serde_json::json!({ "removed": removed }),
        )
    }

    async fn stats(&self) -> OperationResult {
        let entries = self.entries.read().await;
        let total_size: usize = entries.values().map(|e| e.content.len()).sum();
        let original_size: usize = entries.values().map(|e| e.original_size).sum();
        let stats = StoreStats {
            entry_count: entries.len(),
            total_size,
            oldest: entries.values().map(|e| e.created_at).min(),
            newest: entries.values().map(|e| e.created_at).max(),
            compression_ratio: if original_size == 0 {
                1.0
            } else {
                total_size as f64 / original_size as f64
            },
        };
        match serde_json::to_value(&stats) {
            Ok(payload) => self.ok(OperationKind::Stats, payload),
            Err(e) => self.failed(OperationKind::Stats, e.to_string()),
        }
    }

    async fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
