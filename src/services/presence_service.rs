use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::store::{ActiveUserRow, CollabStore, StoreError};
use crate::utils::clock::Clock;

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub is_new_session: bool,
    pub active_users: Vec<ActiveUserRow>,
}

/// Tracks which users are viewing which document through collaboration sessions
pub struct PresenceTracker {
    store: Arc<dyn CollabStore>,
    clock: Arc<dyn Clock>,
}

impl PresenceTracker {
    pub fn new(store: Arc<dyn CollabStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open (or reuse) the user's session and list everyone currently present
    pub async fn join(&self, document_id: i64, user_id: i64) -> Result<JoinOutcome, StoreError> {
        let is_new_session = self
            .store
            .open_session(document_id, user_id, self.clock.now())
            .await
            .map_err(|e| {
                error!("Failed to open session of user {} on document {}: {}", user_id, document_id, e);
                e
            })?;

        if is_new_session {
            info!("User {} started a session on document {}", user_id, document_id);
        }

        match self.store.active_users(document_id).await {
            Ok(active_users) => Ok(JoinOutcome { is_new_session, active_users }),
            Err(e) => {
                // A failed join must not leave the session it opened behind
                if is_new_session {
                    self.close_failed_join(document_id, user_id).await;
                }
                Err(e)
            }
        }
    }

    async fn close_failed_join(&self, document_id: i64, user_id: i64) {
        match self.store.close_session(document_id, user_id, self.clock.now()).await {
            Ok(_) => warn!("Closed session of user {} on document {} after a failed join", user_id, document_id),
            Err(e) => error!(
                "Failed to close session of user {} on document {} after a failed join: {}",
                user_id, document_id, e
            ),
        }
    }

    /// Close the user's open session, if there is one
    pub async fn leave(&self, document_id: i64, user_id: i64) -> Result<(), StoreError> {
        if self.store.close_session(document_id, user_id, self.clock.now()).await? {
            info!("User {} ended their session on document {}", user_id, document_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemoryCollabStore;
    use crate::utils::clock::testing::ManualClock;
    use assert_matches::assert_matches;
    use chrono::Duration;

    fn setup() -> (Arc<MemoryCollabStore>, Arc<ManualClock>, PresenceTracker) {
        let store = Arc::new(MemoryCollabStore::new());
        store.insert_user(1, "Ada Lovelace");
        store.insert_user(2, "Alan Turing");
        store.insert_document(10, "Paper", 1);
        let clock = Arc::new(ManualClock::new("2026-01-01T09:00:00Z".parse().unwrap()));
        let presence = PresenceTracker::new(store.clone(), clock.clone());
        (store, clock, presence)
    }

    #[tokio::test]
    async fn repeated_join_reuses_the_open_session() {
        let (store, _clock, presence) = setup();
        let first = presence.join(10, 1).await.unwrap();
        let second = presence.join(10, 1).await.unwrap();

        assert!(first.is_new_session);
        assert!(!second.is_new_session);
        assert_eq!(store.open_session_count(10, 1), 1);
        assert_eq!(second.active_users.len(), 1);
    }

    #[tokio::test]
    async fn join_lists_everyone_present_and_stamps_document() {
        let (store, clock, presence) = setup();
        presence.join(10, 1).await.unwrap();
        clock.advance(Duration::minutes(1));
        let outcome = presence.join(10, 2).await.unwrap();

        let names: Vec<_> = outcome.active_users.iter().map(|u| u.full_name.as_str()).collect();
        assert_eq!(names, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(outcome.active_users[1].joined_at, clock.now());

        let document = store.get_document(10).await.unwrap().unwrap();
        assert_eq!(document.last_collaboration, Some(clock.now()));
    }

    #[tokio::test]
    async fn leave_closes_session_and_is_idempotent() {
        let (store, _clock, presence) = setup();
        presence.join(10, 1).await.unwrap();
        presence.leave(10, 1).await.unwrap();
        presence.leave(10, 1).await.unwrap();

        assert_eq!(store.open_session_count(10, 1), 0);
        assert!(store.active_users(10).await.unwrap().is_empty());

        let again = presence.join(10, 1).await.unwrap();
        assert!(again.is_new_session);
    }

    #[tokio::test]
    async fn failed_user_listing_closes_the_session_it_opened() {
        let (store, _clock, presence) = setup();
        store.fail_active_users(true);

        assert_matches!(presence.join(10, 1).await, Err(StoreError::Database(_)));
        assert_eq!(store.open_session_count(10, 1), 0);

        store.fail_active_users(false);
        let outcome = presence.join(10, 1).await.unwrap();
        assert!(outcome.is_new_session);
    }

    #[tokio::test]
    async fn failed_rejoin_keeps_the_session_that_was_already_open() {
        let (store, _clock, presence) = setup();
        presence.join(10, 1).await.unwrap();
        store.fail_active_users(true);

        assert_matches!(presence.join(10, 1).await, Err(StoreError::Database(_)));
        assert_eq!(store.open_session_count(10, 1), 1);
    }

    #[tokio::test]
    async fn join_on_unknown_document_fails_without_a_session() {
        let (store, _clock, presence) = setup();
        assert_matches!(presence.join(99, 1).await, Err(StoreError::NotFound(_)));
        assert_eq!(store.open_session_count(99, 1), 0);
    }
}
