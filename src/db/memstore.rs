use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::store::{
    Access, ActiveUserRow, CollabStore, DocumentRow, LockAttempt, LockRequest, NewSection, SectionLockRow, SectionMove,
    SectionPatch, SectionRevisionRow, SectionRow, SectionUpdateOutcome, StoreError,
};
use crate::services::revision_service::capture_before_update;
use crate::services::section_tree::{self, PositionChange};

#[derive(Debug, Clone)]
struct SessionRecord {
    document_id: i64,
    user_id: i64,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemState {
    users: HashMap<i64, String>,
    documents: HashMap<i64, DocumentRow>,
    collaborators: HashMap<(i64, i64), Access>,
    sessions: Vec<SessionRecord>,
    locks: HashMap<i64, SectionLockRow>,
    sections: HashMap<i64, SectionRow>,
    revisions: Vec<SectionRevisionRow>,
    next_section_id: i64,
    next_revision_id: i64,
}

impl MemState {
    fn document_sections(&self, document_id: i64) -> Vec<SectionRow> {
        self.sections
            .values()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect()
    }

    fn section(&self, section_id: i64) -> Result<SectionRow, StoreError> {
        self.sections
            .get(&section_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Section {}", section_id)))
    }

    fn apply(&mut self, changes: &[PositionChange]) {
        for change in changes {
            if let Some(section) = self.sections.get_mut(&change.id) {
                section.parent_id = change.parent_id;
                section.position = change.position;
            }
        }
    }
}

/// In-process store.
///
/// All state sits behind one mutex, which is the single serialization point for lock
/// acquisition. Used when no database is configured and by the tests; nothing survives
/// a restart.
#[derive(Default)]
pub struct MemoryCollabStore {
    state: Mutex<MemState>,
    #[cfg(test)]
    fail_active_users: std::sync::atomic::AtomicBool,
}

impl MemoryCollabStore {
    pub fn new() -> Self {
        info!("Using in-memory collaboration store");
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemState> {
        // A panic while holding the guard leaves plain data behind, keep serving it
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_user(&self, user_id: i64, full_name: &str) {
        self.state().users.insert(user_id, full_name.to_string());
    }

    pub fn insert_document(&self, document_id: i64, title: &str, owner_id: i64) {
        self.state().documents.insert(
            document_id,
            DocumentRow {
                id: document_id,
                title: title.to_string(),
                owner_id,
                collaboration_enabled: false,
                last_collaboration: None,
            },
        );
    }

    pub fn add_collaborator(&self, document_id: i64, user_id: i64, access: Access) {
        self.state().collaborators.insert((document_id, user_id), access);
    }

    /// Store with two users sharing one document, for running without a database
    pub fn with_demo_data() -> Self {
        let store = Self::new();
        store.insert_user(1, "Demo Owner");
        store.insert_user(2, "Demo Editor");
        store.insert_document(1, "Demo document", 1);
        store.add_collaborator(1, 2, Access::Edit);
        info!("Seeded in-memory store with users 1 and 2 sharing document 1");
        store
    }

    /// Number of open sessions for a (document, user) pair
    #[cfg(test)]
    pub fn open_session_count(&self, document_id: i64, user_id: i64) -> usize {
        self.state()
            .sessions
            .iter()
            .filter(|s| s.document_id == document_id && s.user_id == user_id && s.ended_at.is_none())
            .count()
    }

    #[cfg(test)]
    pub fn lock_count(&self) -> usize {
        self.state().locks.len()
    }

    /// Make `active_users` answer with a database error
    #[cfg(test)]
    pub fn fail_active_users(&self, fail: bool) {
        self.fail_active_users.store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl CollabStore for MemoryCollabStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_document(&self, document_id: i64) -> Result<Option<DocumentRow>, StoreError> {
        Ok(self.state().documents.get(&document_id).cloned())
    }

    async fn document_access(&self, document_id: i64, user_id: i64) -> Result<Access, StoreError> {
        let state = self.state();
        let Some(document) = state.documents.get(&document_id) else {
            return Ok(Access::None);
        };
        if document.owner_id == user_id {
            return Ok(Access::Edit);
        }
        Ok(state
            .collaborators
            .get(&(document_id, user_id))
            .copied()
            .unwrap_or(Access::None))
    }

    async fn open_session(&self, document_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state();
        if !state.documents.contains_key(&document_id) {
            return Err(StoreError::NotFound(format!("Document {}", document_id)));
        }
        let open = state
            .sessions
            .iter()
            .any(|s| s.document_id == document_id && s.user_id == user_id && s.ended_at.is_none());
        if open {
            return Ok(false);
        }

        state.sessions.push(SessionRecord { document_id, user_id, started_at: now, ended_at: None });
        if let Some(document) = state.documents.get_mut(&document_id) {
            document.last_collaboration = Some(now);
        }
        Ok(true)
    }

    async fn close_session(&self, document_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state();
        let mut closed = false;
        for session in state
            .sessions
            .iter_mut()
            .filter(|s| s.document_id == document_id && s.user_id == user_id && s.ended_at.is_none())
        {
            session.ended_at = Some(now);
            closed = true;
        }
        Ok(closed)
    }

    async fn active_users(&self, document_id: i64) -> Result<Vec<ActiveUserRow>, StoreError> {
        #[cfg(test)]
        if self.fail_active_users.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let state = self.state();
        let mut users: Vec<ActiveUserRow> = state
            .sessions
            .iter()
            .filter(|s| s.document_id == document_id && s.ended_at.is_none())
            .map(|s| ActiveUserRow {
                user_id: s.user_id,
                full_name: state.users.get(&s.user_id).cloned().unwrap_or_default(),
                joined_at: s.started_at,
            })
            .collect();
        users.sort_by_key(|u| (u.joined_at, u.user_id));
        Ok(users)
    }

    async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state();
        let before = state.locks.len();
        state.locks.retain(|_, lock| lock.is_live(now));
        let swept = (before - state.locks.len()) as u64;
        if swept > 0 {
            debug!("Swept {} expired locks", swept);
        }
        Ok(swept)
    }

    async fn acquire_lock(&self, request: &LockRequest) -> Result<LockAttempt, StoreError> {
        let mut state = self.state();
        let existing = state
            .locks
            .get(&request.section_id)
            .filter(|lock| lock.is_live(request.now))
            .cloned();
        let attempt = match existing {
            Some(lock) if lock.user_id != request.user_id => LockAttempt::Held(lock),
            Some(mut lock) => {
                lock.expires_at = request.expires_at;
                state.locks.insert(request.section_id, lock.clone());
                LockAttempt::Granted(lock)
            }
            None => {
                let lock = SectionLockRow {
                    section_id: request.section_id,
                    user_id: request.user_id,
                    locked_at: request.now,
                    expires_at: request.expires_at,
                };
                state.locks.insert(request.section_id, lock.clone());
                LockAttempt::Granted(lock)
            }
        };

        if matches!(attempt, LockAttempt::Granted(_)) {
            if let Some(document) = state.documents.get_mut(&request.document_id) {
                document.collaboration_enabled = true;
                document.last_collaboration = Some(request.now);
            }
        }
        Ok(attempt)
    }

    async fn release_lock(&self, section_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state();
        match state.locks.get(&section_id) {
            Some(lock) if lock.user_id == user_id => {
                let live = lock.is_live(now);
                state.locks.remove(&section_id);
                Ok(live)
            }
            _ => Ok(false),
        }
    }

    async fn get_lock(&self, section_id: i64) -> Result<Option<SectionLockRow>, StoreError> {
        Ok(self.state().locks.get(&section_id).cloned())
    }

    async fn get_section(&self, section_id: i64) -> Result<Option<SectionRow>, StoreError> {
        Ok(self.state().sections.get(&section_id).cloned())
    }

    async fn list_sections(&self, document_id: i64) -> Result<Vec<SectionRow>, StoreError> {
        let mut sections = self.state().document_sections(document_id);
        sections.sort_by_key(|s| (s.parent_id, s.position, s.id));
        Ok(sections)
    }

    async fn create_section(&self, section: &NewSection, now: DateTime<Utc>) -> Result<SectionRow, StoreError> {
        let mut state = self.state();
        if !state.documents.contains_key(&section.document_id) {
            return Err(StoreError::NotFound(format!("Document {}", section.document_id)));
        }
        let siblings = state.document_sections(section.document_id);
        let (position, changes) = section_tree::plan_insert(&siblings, section.parent_id, section.position)?;
        state.apply(&changes);

        state.next_section_id += 1;
        let row = SectionRow {
            id: state.next_section_id,
            document_id: section.document_id,
            parent_id: section.parent_id,
            title: section.title.clone(),
            content: section.content.clone(),
            position,
            modified_at: now,
        };
        state.sections.insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_section(
        &self,
        section_id: i64,
        patch: &SectionPatch,
        editor_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<SectionUpdateOutcome, StoreError> {
        let mut state = self.state();
        let current = state.section(section_id)?;

        let revision = capture_before_update(&current, patch.content.as_deref(), editor_id).map(|pending| {
            state.next_revision_id += 1;
            let row = SectionRevisionRow {
                id: state.next_revision_id,
                section_id: pending.section_id,
                user_id: pending.user_id,
                content: pending.content,
                created_at: now,
            };
            state.revisions.push(row.clone());
            row
        });

        if let Some(position) = patch.position.filter(|p| *p != current.position) {
            let sections = state.document_sections(current.document_id);
            let changes = section_tree::plan_reorder(&sections, section_id, position)?;
            state.apply(&changes);
        }

        let section = state.sections.get_mut(&section_id).ok_or_else(|| StoreError::NotFound(format!("Section {}", section_id)))?;
        if let Some(title) = &patch.title {
            section.title = title.clone();
        }
        if let Some(content) = &patch.content {
            section.content = Some(content.clone());
        }
        section.modified_at = now;

        Ok(SectionUpdateOutcome { section: section.clone(), revision })
    }

    async fn move_section(&self, section_id: i64, target: &SectionMove, now: DateTime<Utc>) -> Result<SectionRow, StoreError> {
        let mut state = self.state();
        let current = state.section(section_id)?;
        let sections = state.document_sections(current.document_id);
        let plan = section_tree::plan_move(&sections, section_id, target)?;
        state.apply(&plan.changes);

        let section = state.sections.get_mut(&section_id).ok_or_else(|| StoreError::NotFound(format!("Section {}", section_id)))?;
        section.modified_at = now;
        Ok(section.clone())
    }

    async fn delete_section(&self, section_id: i64) -> Result<(), StoreError> {
        let mut state = self.state();
        let current = state.section(section_id)?;
        let sections = state.document_sections(current.document_id);
        let (removed, changes) = section_tree::plan_delete(&sections, section_id)?;

        for id in &removed {
            state.sections.remove(id);
            state.locks.remove(id);
        }
        state.revisions.retain(|r| !removed.contains(&r.section_id));
        state.apply(&changes);
        Ok(())
    }

    async fn list_revisions(&self, section_id: i64) -> Result<Vec<SectionRevisionRow>, StoreError> {
        let mut revisions: Vec<SectionRevisionRow> = self
            .state()
            .revisions
            .iter()
            .filter(|r| r.section_id == section_id)
            .cloned()
            .collect();
        revisions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(revisions)
    }
}
