//! Admission control
//!
//! Every operation holds one permit from its tier's semaphore and, when a
//! ceiling is configured for its operation kind, one from the operation's
//! semaphore. Waiters queue FIFO and give up with
//! [`AdmissionError::Timeout`] once the acquisition deadline passes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::AdmissionError;
use crate::memory::types::{OperationKind, Tier};
use crate::telemetry::Telemetry;

/// Counts a waiter for as long as it is alive, including when the wait is cancelled
struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of one semaphore
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemaphoreSnapshot {
    pub name: String,
    pub total: usize,
    pub available: usize,
    pub waiting: usize,
    /// 1 - available / total
    pub utilization: f64,
}

/// A named counting semaphore with a fixed number of permits
#[derive(Debug)]
pub struct ResourceSemaphore {
    name: String,
    total: usize,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
}

impl ResourceSemaphore {
    pub fn new(name: impl Into<String>, total: usize) -> Self {
        Self {
            name: name.into(),
            total,
            semaphore: Arc::new(Semaphore::new(total)),
            waiting: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits().min(self.total)
    }

    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn utilization(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        1.0 - self.available() as f64 / self.total as f64
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Wait up to `timeout` for a permit
    pub async fn acquire(&self, timeout: Duration) -> Result<OwnedSemaphorePermit, AdmissionError> {
        self.acquire_until(Instant::now() + timeout, timeout).await
    }

    /// Wait until `deadline` for a permit; `budget` is reported on timeout
    async fn acquire_until(
        &self,
        deadline: Instant,
        budget: Duration,
    ) -> Result<OwnedSemaphorePermit, AdmissionError> {
        if let Some(permit) = self.try_acquire_owned()? {
            return Ok(permit);
        }

        let _waiting = WaitingGuard::enter(&self.waiting);
        match tokio::time::timeout_at(deadline, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(AdmissionError::Closed {
                resource: self.name.clone(),
            }),
            Err(_) => Err(AdmissionError::Timeout {
                resource: self.name.clone(),
                waited_ms: budget.as_millis() as u64,
            }),
        }
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.try_acquire_owned().ok().flatten()
    }

    fn try_acquire_owned(&self) -> Result<Option<OwnedSemaphorePermit>, AdmissionError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(AdmissionError::Closed {
                resource: self.name.clone(),
            }),
        }
    }

    /// Fail current and future waiters with `Closed`
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn snapshot(&self) -> SemaphoreSnapshot {
        SemaphoreSnapshot {
            name: self.name.clone(),
            total: self.total,
            available: self.available(),
            waiting: self.waiting(),
            utilization: self.utilization(),
        }
    }
}

/// Proof of admission for one operation on one tier.
///
/// Call [`AdmissionPermit::release`] exactly once when the operation
/// finishes; a second call returns [`AdmissionError::AlreadyReleased`].
/// Dropping an unreleased permit releases it.
#[derive(Debug)]
pub struct AdmissionPermit {
    tier: Tier,
    operation: OperationKind,
    tier_permit: Option<OwnedSemaphorePermit>,
    operation_permit: Option<OwnedSemaphorePermit>,
    released: bool,
    acquired_at: Instant,
}

impl AdmissionPermit {
    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn release(&mut self) -> Result<(), AdmissionError> {
        if self.released {
            return Err(AdmissionError::AlreadyReleased);
        }
        self.released = true;
        self.tier_permit.take();
        self.operation_permit.take();
        Ok(())
    }
}

/// Concurrency stats for health reporting
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConcurrencySnapshot {
    pub tiers: BTreeMap<Tier, SemaphoreSnapshot>,
    pub operations: BTreeMap<OperationKind, SemaphoreSnapshot>,
    pub acquire_timeout_ms: u64,
}

impl ConcurrencySnapshot {
    /// Highest utilization across every semaphore
    pub fn max_utilization(&self) -> f64 {
        self.tiers
            .values()
            .chain(self.operations.values())
            .map(|s| s.utilization)
            .fold(0.0, f64::max)
    }
}

/// Per-tier and per-operation admission
pub struct AdmissionController {
    tiers: HashMap<Tier, ResourceSemaphore>,
    operations: HashMap<OperationKind, ResourceSemaphore>,
    timeout: Duration,
    telemetry: Arc<Telemetry>,
}

impl AdmissionController {
    pub fn new(config: &OrchestratorConfig, telemetry: Arc<Telemetry>) -> Self {
        let tiers = config
            .concurrency
            .per_tier
            .iter()
            .map(|(tier, limit)| (*tier, ResourceSemaphore::new(format!("tier:{tier}"), *limit)))
            .collect();
        let operations = config
            .concurrency
            .per_operation
            .iter()
            .map(|(op, limit)| (*op, ResourceSemaphore::new(format!("operation:{op}"), *limit)))
            .collect();

        Self {
            tiers,
            operations,
            timeout: Duration::from_millis(config.acquire_timeout_ms),
            telemetry,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tier_semaphore(&self, tier: Tier) -> Option<&ResourceSemaphore> {
        self.tiers.get(&tier)
    }

    pub fn operation_semaphore(&self, operation: OperationKind) -> Option<&ResourceSemaphore> {
        self.operations.get(&operation)
    }

    /// Acquire with the configured timeout
    pub async fn acquire(
        &self,
        tier: Tier,
        operation: OperationKind,
    ) -> Result<AdmissionPermit, AdmissionError> {
        self.acquire_with_timeout(tier, operation, self.timeout).await
    }

    /// Acquire the operation permit, then the tier permit, within one deadline.
    ///
    /// On failure any permit already taken is returned before the error.
    pub async fn acquire_with_timeout(
        &self,
        tier: Tier,
        operation: OperationKind,
        timeout: Duration,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let result = self.acquire_inner(tier, operation, timeout).await;
        match &result {
            Ok(_) => {
                self.telemetry.record_admission_acquired();
                debug!(tier = %tier, operation = %operation, "Admission permit acquired");
            }
            Err(e @ AdmissionError::Timeout { .. }) => {
                self.telemetry.record_admission_timeout();
                warn!(tier = %tier, operation = %operation, error = %e, "Admission timed out");
            }
            Err(e) => {
                self.telemetry.record_admission_rejected();
                warn!(tier = %tier, operation = %operation, error = %e, "Admission rejected");
            }
        }
        result
    }

    async fn acquire_inner(
        &self,
        tier: Tier,
        operation: OperationKind,
        timeout: Duration,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let tier_semaphore = self
            .tiers
            .get(&tier)
            .ok_or_else(|| AdmissionError::UnknownResource(format!("tier:{tier}")))?;
        let deadline = Instant::now() + timeout;

        let operation_permit = match self.operations.get(&operation) {
            Some(semaphore) => Some(semaphore.acquire_until(deadline, timeout).await?),
            None => None,
        };
        let tier_permit = tier_semaphore.acquire_until(deadline, timeout).await?;

        Ok(AdmissionPermit {
            tier,
            operation,
            tier_permit: Some(tier_permit),
            operation_permit,
            released: false,
            acquired_at: Instant::now(),
        })
    }

    /// Non-blocking variant; `None` when any required permit is taken
    pub fn try_acquire(&self, tier: Tier, operation: OperationKind) -> Option<AdmissionPermit> {
        let tier_semaphore = self.tiers.get(&tier)?;
        let operation_permit = match self.operations.get(&operation) {
            Some(semaphore) => Some(semaphore.try_acquire()?),
            None => None,
        };
        let tier_permit = tier_semaphore.try_acquire()?;

        self.telemetry.record_admission_acquired();
        Some(AdmissionPermit {
            tier,
            operation,
            tier_permit: Some(tier_permit),
            operation_permit,
            released: false,
            acquired_at: Instant::now(),
        })
    }

    pub fn release(&self, permit: &mut AdmissionPermit) -> Result<(), AdmissionError> {
        permit.release()?;
        debug!(
            tier = %permit.tier,
            operation = %permit.operation,
            held_ms = permit.held_for().as_millis() as u64,
            "Admission permit released"
        );
        Ok(())
    }

    /// Close every semaphore; pending and future acquisitions fail with `Closed`
    pub fn close(&self) {
        for semaphore in self.tiers.values().chain(self.operations.values()) {
            semaphore.close();
        }
        info!("Admission controller closed");
    }

    pub fn snapshot(&self) -> ConcurrencySnapshot {
        ConcurrencySnapshot {
            tiers: self.tiers.iter().map(|(t, s)| (*t, s.snapshot())).collect(),
            operations: self
                .operations
                .iter()
                .map(|(op, s)| (*op, s.snapshot()))
                .collect(),
            acquire_timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConcurrencyConfig;

    fn controller(per_tier: usize, per_operation: &[(OperationKind, usize)]) -> AdmissionController {
        let config = OrchestratorConfig {
            acquire_timeout_ms: 100,
            concurrency: ConcurrencyConfig {
                per_tier: Tier::ALL.iter().map(|t| (*t, per_tier)).collect(),
                per_operation: per_operation.iter().copied().collect(),
            },
            ..OrchestratorConfig::default()
        };
        AdmissionController::new(&config, Arc::new(Telemetry::default()))
    }

    mod semaphore {
        use super::*;

        #[tokio::test]
        async fn test_acquire_and_drop_restores_permit() {
            let sem = ResourceSemaphore::new("test", 2);
            let permit = sem.acquire(Duration::from_millis(10)).await.unwrap();
            assert_eq!(sem.available(), 1);
            assert!((sem.utilization() - 0.5).abs() < f64::EPSILON);
            drop(permit);
            assert_eq!(sem.available(), 2);
        }

        #[tokio::test]
        async fn test_try_acquire_when_exhausted() {
            let sem = ResourceSemaphore::new("test", 1);
            let held = sem.try_acquire();
            assert!(held.is_some());
            assert!(sem.try_acquire().is_none());
        }

        #[tokio::test(start_paused = true)]
        async fn test_timeout_is_distinct_error() {
            let sem = ResourceSemaphore::new("tier:working", 1);
            let _held = sem.try_acquire().unwrap();

            let started = Instant::now();
            let err = sem.acquire(Duration::from_millis(100)).await.unwrap_err();

            assert_eq!(
                err,
                AdmissionError::Timeout {
                    resource: "tier:working".to_string(),
                    waited_ms: 100,
                }
            );
            assert!(err.is_retryable());
            let waited = started.elapsed();
            assert!(waited >= Duration::from_millis(100));
            assert!(waited < Duration::from_millis(150));
            assert_eq!(sem.waiting(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_waiter_is_served_when_permit_frees() {
            let sem = Arc::new(ResourceSemaphore::new("test", 1));
            let held = sem.try_acquire().unwrap();

            let waiter = {
                let sem = sem.clone();
                tokio::spawn(async move { sem.acquire(Duration::from_secs(1)).await.is_ok() })
            };
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(sem.waiting(), 1);

            drop(held);
            assert!(waiter.await.unwrap());
        }

        #[tokio::test]
        async fn test_close_fails_waiters() {
            let sem = Arc::new(ResourceSemaphore::new("test", 1));
            let _held = sem.try_acquire().unwrap();

            let waiter = {
                let sem = sem.clone();
                tokio::spawn(async move { sem.acquire(Duration::from_secs(30)).await })
            };
            tokio::task::yield_now().await;
            sem.close();

            let err = waiter.await.unwrap().unwrap_err();
            assert!(matches!(err, AdmissionError::Closed { .. }));
            assert!(!err.is_retryable());
        }
    }

    #[tokio::test]
    async fn test_release_twice_is_detected() {
        let admission = controller(1, &[]);
        let mut permit = admission
            .acquire(Tier::Working, OperationKind::Store)
            .await
            .unwrap();
        assert_eq!(admission.tier_semaphore(Tier::Working).unwrap().available(), 0);

        admission.release(&mut permit).unwrap();
        assert_eq!(admission.tier_semaphore(Tier::Working).unwrap().available(), 1);
        assert_eq!(
            admission.release(&mut permit),
            Err(AdmissionError::AlreadyReleased)
        );
        assert_eq!(admission.tier_semaphore(Tier::Working).unwrap().available(), 1);
    }

    #[tokio::test]
    async fn test_available_never_exceeds_total() {
        let admission = controller(3, &[]);
        let sem = admission.tier_semaphore(Tier::Episodic).unwrap();
        for _ in 0..5 {
            let mut a = admission.acquire(Tier::Episodic, OperationKind::Retrieve).await.unwrap();
            let mut b = admission.acquire(Tier::Episodic, OperationKind::Retrieve).await.unwrap();
            assert!(sem.available() <= sem.total());
            a.release().unwrap();
            b.release().unwrap();
            let _ = b.release();
            assert_eq!(sem.available(), sem.total());
        }
    }

    #[tokio::test]
    async fn test_operation_ceiling_applies_across_tiers() {
        let admission = controller(4, &[(OperationKind::Compress, 1)]);
        let _held = admission
            .acquire(Tier::Semantic, OperationKind::Compress)
            .await
            .unwrap();

        assert!(admission.try_acquire(Tier::Episodic, OperationKind::Compress).is_none());
        // operations without a ceiling only need the tier permit
        assert!(admission.try_acquire(Tier::Episodic, OperationKind::Search).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tier_acquire_returns_operation_permit() {
        let admission = controller(1, &[(OperationKind::Store, 2)]);
        let _held = admission
            .acquire(Tier::Working, OperationKind::Store)
            .await
            .unwrap();

        let err = admission
            .acquire(Tier::Working, OperationKind::Store)
            .await
            .unwrap_err();
        assert!(matches!(err, AdmissionError::Timeout { .. }));

        let op = admission.operation_semaphore(OperationKind::Store).unwrap();
        assert_eq!(op.available(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tier() {
        let config = OrchestratorConfig {
            concurrency: ConcurrencyConfig {
                per_tier: HashMap::from([(Tier::Working, 1)]),
                per_operation: HashMap::new(),
            },
            ..OrchestratorConfig::default()
        };
        let admission = AdmissionController::new(&config, Arc::new(Telemetry::default()));
        let err = admission
            .acquire(Tier::Shared, OperationKind::Store)
            .await
            .unwrap_err();
        assert_eq!(err, AdmissionError::UnknownResource("tier:shared".to_string()));
    }

    #[tokio::test]
    async fn test_snapshot_reports_utilization() {
        let admission = controller(2, &[(OperationKind::Search, 4)]);
        let _held = admission
            .acquire(Tier::Semantic, OperationKind::Search)
            .await
            .unwrap();

        let snapshot = admission.snapshot();
        assert_eq!(snapshot.tiers[&Tier::Semantic].available, 1);
        assert!((snapshot.tiers[&Tier::Semantic].utilization - 0.5).abs() < f64::EPSILON);
        assert!((snapshot.operations[&OperationKind::Search].utilization - 0.25).abs() < f64::EPSILON);
        assert!((snapshot.max_utilization() - 0.5).abs() < f64::EPSILON);
    }
}
