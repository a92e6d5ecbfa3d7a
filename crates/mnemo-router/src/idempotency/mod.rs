//! Idempotent replay protection
//!
//! Results of completed operations are cached under a request fingerprint
//! for a fixed TTL. Expired entries are dropped on lookup and purged on every
//! write; at capacity the entry closest to expiry is evicted.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use crate::config::IdempotencyConfig;
use crate::memory::types::{OperationKind, RoutingContext};

const FIELD_SEPARATOR: u8 = 0x1f;

/// Expiry used when `now + ttl` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Request fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Wrap a caller-computed fingerprint
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self(fingerprint.into())
    }

    /// sha256 over the operation, target key, content, session and user
    pub fn fingerprint(
        operation: OperationKind,
        key: Option<&str>,
        content: Option<&str>,
        session_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(operation.as_str().as_bytes());
        for field in [key, content, session_id, user_id] {
            hasher.update([FIELD_SEPARATOR]);
            hasher.update(field.unwrap_or_default().as_bytes());
        }
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    pub fn from_context(ctx: &RoutingContext) -> Self {
        Self::fingerprint(
            ctx.operation,
            ctx.metadata.key.as_deref(),
            ctx.content.as_deref(),
            ctx.metadata.session_id.as_deref(),
            ctx.metadata.user_id.as_deref(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of an idempotency lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdempotencyResult<V> {
    pub key: IdempotencyKey,
    pub hit: bool,
    pub value: Option<V>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_access: Option<DateTime<Utc>>,
    pub access_count: u64,
}

impl<V> IdempotencyResult<V> {
    fn miss(key: IdempotencyKey) -> Self {
        Self {
            key,
            hit: false,
            value: None,
            created_at: None,
            last_access: None,
            access_count: 0,
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    expires_at: Instant,
    access_count: u64,
    last_access: DateTime<Utc>,
}

/// TTL cache of completed results keyed by fingerprint
#[derive(Debug)]
pub struct IdempotencyCache<V> {
    enabled: bool,
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<IdempotencyKey, CacheEntry<V>>>,
}

impl<V: Clone> IdempotencyCache<V> {
    pub fn new(config: &IdempotencyConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: Duration::from_secs(config.ttl_secs),
            max_entries: config.max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    fn expiry_from(&self, now: Instant) -> Instant {
        now.checked_add(self.ttl)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdempotencyKey, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Look up `key`; a hit bumps the access count and last-access time
    pub fn check(&self, key: &IdempotencyKey) -> IdempotencyResult<V> {
        if !self.enabled {
            return IdempotencyResult::miss(key.clone());
        }

        let mut entries = self.lock();
        let now = Instant::now();

        let expired = match entries.get_mut(key) {
            None => return IdempotencyResult::miss(key.clone()),
            Some(entry) if entry.expires_at <= now => true,
            Some(entry) => {
                entry.access_count += 1;
                entry.last_access = Utc::now();
                debug!(key = %key, access_count = entry.access_count, "Idempotency hit");
                return IdempotencyResult {
                    key: key.clone(),
                    hit: true,
                    value: Some(entry.value.clone()),
                    created_at: Some(entry.created_at),
                    last_access: Some(entry.last_access),
                    access_count: entry.access_count,
                };
            }
        };

        if expired {
            entries.remove(key);
            debug!(key = %key, "Idempotency entry expired");
        }
        IdempotencyResult::miss(key.clone())
    }

    /// Cache `value` under `key`. Returns the number of entries evicted.
    pub fn store(&self, key: IdempotencyKey, value: V) -> usize {
        if !self.enabled {
            return 0;
        }

        let mut entries = self.lock();
        let now = Instant::now();

        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let mut evicted = before - entries.len();

        if !entries.contains_key(&key) {
            while entries.len() >= self.max_entries {
                let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.expires_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                entries.remove(&oldest);
                evicted += 1;
            }
        }

        let created_at = Utc::now();
        entries.insert(
            key,
            CacheEntry {
                value,
                created_at,
                expires_at: self.expiry_from(now),
                access_count: 0,
                last_access: created_at,
            },
        );

        if evicted > 0 {
            debug!(evicted, size = entries.len(), "Idempotency entries evicted");
        }
        evicted
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}
