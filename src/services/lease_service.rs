use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::db::store::{CollabStore, LockAttempt, LockRequest, SectionLockRow, StoreError};
use crate::utils::clock::Clock;

/// A time-bounded exclusive claim of one user on one section
pub type Lease = SectionLockRow;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Section is already locked by user {held_by} until {expires_at}")]
    Conflict { held_by: i64, expires_at: DateTime<Utc> },
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Acquires, extends and releases section leases.
///
/// Expiry is the only automatic release: a lease survives disconnects and lives until
/// its holder releases it or `expires_at` passes. Exclusivity is delegated to the
/// store's atomic [`CollabStore::acquire_lock`].
pub struct LeaseManager {
    store: Arc<dyn CollabStore>,
    clock: Arc<dyn Clock>,
    default_duration: Duration,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn CollabStore>, clock: Arc<dyn Clock>, default_duration: Duration) -> Self {
        Self { store, clock, default_duration }
    }

    /// Acquire or renew the lease on `section_id` for `user_id`.
    ///
    /// Re-acquisition by the current holder only moves the expiry. A live lease of another
    /// user fails with [`LeaseError::Conflict`]; callers must not retry automatically.
    pub async fn acquire(
        &self,
        document_id: i64,
        section_id: i64,
        user_id: i64,
        duration: Option<Duration>,
    ) -> Result<Lease, LeaseError> {
        let now = self.clock.now();

        // Lazy sweep; expiry is also checked by the acquisition itself
        if let Err(e) = self.store.sweep_expired_locks(now).await {
            warn!("Failed to sweep expired locks before locking section {}: {}", section_id, e);
        }

        let request = LockRequest {
            document_id,
            section_id,
            user_id,
            now,
            expires_at: now + duration.unwrap_or(self.default_duration),
        };

        match self.store.acquire_lock(&request).await? {
            LockAttempt::Granted(lease) => {
                info!(
                    "Section {} locked by user {} until {}",
                    section_id,
                    user_id,
                    lease.expires_at.to_rfc3339()
                );
                Ok(lease)
            }
            LockAttempt::Held(lease) => {
                debug!(
                    "Section {} lock denied to user {}: held by {} until {}",
                    section_id,
                    user_id,
                    lease.user_id,
                    lease.expires_at.to_rfc3339()
                );
                Err(LeaseError::Conflict { held_by: lease.user_id, expires_at: lease.expires_at })
            }
        }
    }

    /// Release the lease if `user_id` holds it. Returns `true` only when a live lease was removed;
    /// releasing someone else's lease or an expired one is a no-op.
    pub async fn release(&self, section_id: i64, user_id: i64) -> Result<bool, StoreError> {
        let released = self.store.release_lock(section_id, user_id, self.clock.now()).await?;
        if released {
            info!("Section {} unlocked by user {}", section_id, user_id);
        }
        Ok(released)
    }

    /// The live lease on a section, if any
    pub async fn live_lease(&self, section_id: i64) -> Result<Option<Lease>, StoreError> {
        let now = self.clock.now();
        Ok(self.store.get_lock(section_id).await?.filter(|lock| lock.is_live(now)))
    }

    /// Whether `user_id` currently holds a live lease on the section
    pub async fn holds(&self, section_id: i64, user_id: i64) -> Result<bool, StoreError> {
        Ok(self
            .live_lease(section_id)
            .await?
            .is_some_and(|lock| lock.user_id == user_id))
    }

    /// Delete every expired lease
    pub async fn sweep(&self) -> Result<u64, StoreError> {
        self.store.sweep_expired_locks(self.clock.now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemoryCollabStore;
    use crate::utils::clock::testing::ManualClock;
    use assert_matches::assert_matches;

    const DOC: i64 = 1;
    const SECTION: i64 = 7;

    fn setup() -> (Arc<MemoryCollabStore>, Arc<ManualClock>, LeaseManager) {
        let store = Arc::new(MemoryCollabStore::new());
        store.insert_document(DOC, "Paper", 1);
        let clock = Arc::new(ManualClock::new("2026-01-01T12:00:00Z".parse().unwrap()));
        let leases = LeaseManager::new(store.clone(), clock.clone(), Duration::minutes(15));
        (store, clock, leases)
    }

    #[tokio::test]
    async fn first_acquisition_creates_a_lease() {
        let (store, clock, leases) = setup();
        let lease = leases.acquire(DOC, SECTION, 1, None).await.unwrap();
        assert_eq!(lease.user_id, 1);
        assert_eq!(lease.expires_at, clock.now() + Duration::minutes(15));

        let document = store.get_document(DOC).await.unwrap().unwrap();
        assert!(document.collaboration_enabled);
        assert_eq!(document.last_collaboration, Some(clock.now()));
    }

    #[tokio::test]
    async fn holder_reacquisition_only_extends_expiry() {
        let (_store, clock, leases) = setup();
        let first = leases.acquire(DOC, SECTION, 1, None).await.unwrap();

        clock.advance(Duration::minutes(10));
        let renewed = leases.acquire(DOC, SECTION, 1, Some(Duration::minutes(30))).await.unwrap();
        assert_eq!(renewed.user_id, 1);
        assert_eq!(renewed.locked_at, first.locked_at);
        assert_eq!(renewed.expires_at, clock.now() + Duration::minutes(30));
    }

    #[tokio::test]
    async fn other_user_gets_conflict_until_expiry() {
        let (_store, clock, leases) = setup();
        let lease = leases.acquire(DOC, SECTION, 1, None).await.unwrap();

        let denied = leases.acquire(DOC, SECTION, 2, None).await;
        assert_matches!(
            denied,
            Err(LeaseError::Conflict { held_by: 1, expires_at }) if expires_at == lease.expires_at
        );

        clock.advance(Duration::minutes(16));
        let taken = leases.acquire(DOC, SECTION, 2, None).await.unwrap();
        assert_eq!(taken.user_id, 2);
        assert_eq!(taken.locked_at, clock.now());
    }

    #[tokio::test]
    async fn release_by_non_holder_is_a_no_op() {
        let (_store, _clock, leases) = setup();
        leases.acquire(DOC, SECTION, 1, None).await.unwrap();

        assert!(!leases.release(SECTION, 2).await.unwrap());
        assert!(leases.holds(SECTION, 1).await.unwrap());

        assert!(leases.release(SECTION, 1).await.unwrap());
        assert!(!leases.release(SECTION, 1).await.unwrap());
        assert!(leases.live_lease(SECTION).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_lease_counts_as_absent() {
        let (store, clock, leases) = setup();
        leases.acquire(DOC, SECTION, 1, Some(Duration::minutes(1))).await.unwrap();
        clock.advance(Duration::minutes(2));

        assert!(!leases.holds(SECTION, 1).await.unwrap());
        // No sweep has run yet, releasing the stale row reports nothing removed
        assert_eq!(store.lock_count(), 1);
        assert!(!leases.release(SECTION, 1).await.unwrap());
        assert_eq!(store.lock_count(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_leases() {
        let (store, clock, leases) = setup();
        leases.acquire(DOC, 1, 1, Some(Duration::minutes(5))).await.unwrap();
        leases.acquire(DOC, 2, 1, Some(Duration::minutes(20))).await.unwrap();
        clock.advance(Duration::minutes(10));

        assert_eq!(leases.sweep().await.unwrap(), 1);
        assert_eq!(store.lock_count(), 1);
        assert!(leases.holds(2, 1).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_acquisitions_grant_exactly_one_lease() {
        let (store, _clock, leases) = setup();
        let leases = Arc::new(leases);

        let tasks: Vec<_> = (1..=32)
            .map(|user_id| {
                let leases = leases.clone();
                tokio::spawn(async move { leases.acquire(DOC, SECTION, user_id, None).await })
            })
            .collect();

        let mut winners = Vec::new();
        for task in tasks {
            match task.await.unwrap() {
                Ok(lease) => winners.push(lease.user_id),
                Err(LeaseError::Conflict { held_by, .. }) => assert_ne!(held_by, 0),
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(store.lock_count(), 1);
        assert!(leases.holds(SECTION, winners[0]).await.unwrap());
    }
}
