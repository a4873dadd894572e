//! # Lock Manager
//!
//! Short-lived, named, mutually exclusive leases over a resource key, held
//! in the shared `lock_lease` collection so every worker sees the same
//! leases.
//!
//! ## Acquisition
//!
//! One conditional write per attempt:
//!
//! ```text
//! write lease row "type:key"  IF  absent  OR  expires_at_ms <= now
//! ```
//!
//! The store evaluates the condition and applies the write atomically, so two
//! workers racing for the same key in the same instant get exactly one
//! winner. An expired lease is reclaimed by that same write. Acquisition
//! never parks the caller: a held lease is reported as `Concurrency`
//! immediately.
//!
//! ## Release
//!
//! Deletes the row only while it still carries the caller's holder id, so a
//! worker whose lease expired and was re-acquired cannot free the new
//! holder's lease.

use chrono::Duration;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{EngineError, EngineResult, LockLease, LockType};
use crate::ports::outbound::{Collection, Filter, Precondition, RecordStore, TimeSource};

/// Lease-based mutual exclusion over the record store.
pub struct LockManager {
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn TimeSource>,
    default_ttl: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn TimeSource>, default_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            default_ttl,
        }
    }

    /// TTL used by the engine's own operations.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Matches rows whose lease has run out at `now_ms`.
    fn expired_at(now_ms: i64) -> Precondition {
        Precondition::field_less_than("expires_at_ms", now_ms.saturating_add(1))
    }

    /// Try to take the lease. Returns the new holder id.
    ///
    /// # Errors
    /// - `Concurrency` if a live lease exists for `(lock_type, resource_key)`
    /// - `Validation` for a non-positive TTL
    pub async fn acquire(
        &self,
        lock_type: LockType,
        resource_key: &str,
        ttl: Duration,
    ) -> EngineResult<String> {
        if ttl <= Duration::zero() {
            return Err(EngineError::validation("lease ttl must be positive"));
        }

        let now = self.clock.now();
        let holder_id = Uuid::new_v4().simple().to_string();
        let lease = LockLease::new(lock_type, resource_key, holder_id.clone(), now, ttl);
        let row = serde_json::to_value(&lease)
            .map_err(|e| EngineError::Store(format!("row encoding failed: {}", e)))?;

        let free = Precondition::AnyOf(vec![
            Precondition::Absent,
            Self::expired_at(now.timestamp_millis()),
        ]);
        let outcome = self
            .store
            .conditional_write(Collection::LockLease, &lease.key(), row, free)
            .await?;

        if !outcome.is_applied() {
            debug!(lock_type = %lock_type, resource = resource_key, "Lease busy");
            return Err(EngineError::concurrency(format!(
                "{} lease for {} is held by another worker",
                lock_type, resource_key
            )));
        }

        debug!(
            lock_type = %lock_type,
            resource = resource_key,
            holder = %holder_id,
            ttl_secs = ttl.num_seconds(),
            "Lease acquired"
        );
        Ok(holder_id)
    }

    /// Release a lease held by `holder_id`. Returns false if the lease was no
    /// longer ours (expired and reclaimed, or already released).
    pub async fn release(
        &self,
        lock_type: LockType,
        resource_key: &str,
        holder_id: &str,
    ) -> EngineResult<bool> {
        let key = LockLease::storage_key(lock_type, resource_key);
        let outcome = self
            .store
            .delete(
                Collection::LockLease,
                &key,
                Precondition::field_equals("holder_id", holder_id),
            )
            .await?;

        if outcome.is_applied() {
            debug!(lock_type = %lock_type, resource = resource_key, holder = holder_id, "Lease released");
            Ok(true)
        } else {
            warn!(
                lock_type = %lock_type,
                resource = resource_key,
                holder = holder_id,
                "Lease was no longer held at release"
            );
            Ok(false)
        }
    }

    /// Run `f` while holding the lease.
    ///
    /// The lease is released on every return path, and the result of `f` is
    /// returned unchanged. If `f` panics or the future is dropped the lease is
    /// left to expire after its TTL.
    pub async fn with_lock<T, F, Fut>(
        &self,
        lock_type: LockType,
        resource_key: &str,
        ttl: Duration,
        f: F,
    ) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let holder_id = self.acquire(lock_type, resource_key, ttl).await?;
        let result = f().await;

        if let Err(err) = self.release(lock_type, resource_key, &holder_id).await {
            warn!(
                lock_type = %lock_type,
                resource = resource_key,
                error = %err,
                "Lease release failed; it will expire on its own"
            );
        }
        result
    }

    /// Delete every expired lease. Called by the periodic sweep.
    pub async fn sweep_expired(&self) -> EngineResult<usize> {
        let now_ms = self.clock.now().timestamp_millis();
        let removed = self
            .store
            .delete_where(Collection::LockLease, Self::expired_at(now_ms))
            .await?;
        if removed > 0 {
            info!(removed, "Swept expired leases");
        }
        Ok(removed)
    }

    /// Live leases, optionally only those on `resource_key`.
    pub async fn active_leases(&self, resource_key: Option<&str>) -> EngineResult<Vec<LockLease>> {
        let filter = match resource_key {
            Some(key) => Filter::new().eq("resource_key", key),
            None => Filter::new(),
        };
        let now = self.clock.now();
        let rows = self.store.select(Collection::LockLease, &filter).await?;

        let mut leases = Vec::with_capacity(rows.len());
        for row in rows {
            let lease: LockLease = serde_json::from_value(row)
                .map_err(|e| EngineError::Store(format!("row decoding failed: {}", e)))?;
            if !lease.is_expired(now) {
                leases.push(lease);
            }
        }
        Ok(leases)
    }

    /// Remove a lease regardless of holder. Operator escape hatch.
    pub async fn force_release(&self, lock_type: LockType, resource_key: &str) -> EngineResult<bool> {
        let key = LockLease::storage_key(lock_type, resource_key);
        let outcome = self
            .store
            .delete(Collection::LockLease, &key, Precondition::Always)
            .await?;
        if outcome.is_applied() {
            warn!(lock_type = %lock_type, resource = resource_key, "Lease force-released");
        }
        Ok(outcome.is_applied())
    }

    /// Spawn a task that runs [`sweep_expired`](Self::sweep_expired) every
    /// `interval`.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(err) = manager.sweep_expired().await {
                    warn!(error = %err, "Lease sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryRecordStore, ManualClock};
    use crate::domain::ErrorKind;
    use chrono::{DateTime, Utc};

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn setup() -> (Arc<InMemoryRecordStore>, Arc<ManualClock>, LockManager) {
        let store = Arc::new(InMemoryRecordStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let manager = LockManager::new(store.clone(), clock.clone(), Duration::seconds(300));
        (store, clock, manager)
    }

    #[tokio::test]
    async fn test_acquire_then_busy() {
        let (_, _, locks) = setup();
        let holder = locks
            .acquire(LockType::RotationAdvance, "g1", Duration::seconds(30))
            .await
            .unwrap();
        assert!(holder.len() >= 16);

        let err = locks
            .acquire(LockType::RotationAdvance, "g1", Duration::seconds(30))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Concurrency);
    }

    #[tokio::test]
    async fn test_lock_types_are_independent() {
        let (_, _, locks) = setup();
        locks
            .acquire(LockType::RotationAdvance, "g1", Duration::seconds(30))
            .await
            .unwrap();
        assert!(locks
            .acquire(LockType::DefaultHandling, "g1", Duration::seconds(30))
            .await
            .is_ok());
        assert!(locks
            .acquire(LockType::RotationAdvance, "g2", Duration::seconds(30))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed_on_acquire() {
        let (_, clock, locks) = setup();
        let first = locks
            .acquire(LockType::MemberJoin, "g1", Duration::seconds(30))
            .await
            .unwrap();
        clock.advance(Duration::seconds(30));
        let second = locks
            .acquire(LockType::MemberJoin, "g1", Duration::seconds(30))
            .await
            .unwrap();
        assert_ne!(first, second);

        // the stale holder cannot release the new lease
        assert!(!locks.release(LockType::MemberJoin, "g1", &first).await.unwrap());
        assert_eq!(locks.active_leases(Some("g1")).await.unwrap().len(), 1);
        assert!(locks.release(LockType::MemberJoin, "g1", &second).await.unwrap());
        assert!(locks.active_leases(Some("g1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_with_lock_releases_on_error() {
        let (_, _, locks) = setup();
        let result: EngineResult<()> = locks
            .with_lock(LockType::RotationAdvance, "g1", Duration::seconds(30), || async {
                Err(EngineError::business("boom"))
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::BusinessLogic);
        assert!(locks.active_leases(None).await.unwrap().is_empty());

        let value = locks
            .with_lock(LockType::RotationAdvance, "g1", Duration::seconds(30), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_with_lock_reports_contention_without_running() {
        let (_, _, locks) = setup();
        locks
            .acquire(LockType::RotationAdvance, "g1", Duration::seconds(30))
            .await
            .unwrap();
        let mut ran = false;
        let result = locks
            .with_lock(LockType::RotationAdvance, "g1", Duration::seconds(30), || {
                ran = true;
                async { Ok(()) }
            })
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Concurrency);
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_sweep_and_force_release() {
        let (store, clock, locks) = setup();
        locks
            .acquire(LockType::RotationAdvance, "a", Duration::seconds(10))
            .await
            .unwrap();
        locks
            .acquire(LockType::RotationAdvance, "b", Duration::seconds(60))
            .await
            .unwrap();
        clock.advance(Duration::seconds(20));

        assert_eq!(locks.sweep_expired().await.unwrap(), 1);
        assert_eq!(store.len(Collection::LockLease), 1);

        assert!(locks.force_release(LockType::RotationAdvance, "b").await.unwrap());
        assert!(!locks.force_release(LockType::RotationAdvance, "b").await.unwrap());
        assert!(store.is_empty(Collection::LockLease));
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let (_, _, locks) = setup();
        let err = locks
            .acquire(LockType::RotationAdvance, "g1", Duration::zero())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_acquirers_get_one_winner() {
        let (store, clock, _) = setup();
        let locks = Arc::new(LockManager::new(store, clock, Duration::seconds(300)));
        let attempts: Vec<_> = (0..32)
            .map(|_| {
                let locks = locks.clone();
                tokio::spawn(async move {
                    locks
                        .acquire(LockType::RotationAdvance, "g1", Duration::seconds(30))
                        .await
                })
            })
            .collect();

        let mut winners = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
