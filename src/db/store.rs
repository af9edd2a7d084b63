use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a collaboration store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Rejected(String),
}

/// Document row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
    pub collaboration_enabled: bool,
    pub last_collaboration: Option<DateTime<Utc>>,
}

/// Section row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SectionRow {
    pub id: i64,
    pub document_id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub content: Option<String>,
    pub position: i32,
    pub modified_at: DateTime<Utc>,
}

/// A live or stale lock row. Liveness is decided against a clock, see [`SectionLockRow::is_live`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SectionLockRow {
    pub section_id: i64,
    pub user_id: i64,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SectionLockRow {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SectionRevisionRow {
    pub id: i64,
    pub section_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A user with an open collaboration session on a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActiveUserRow {
    pub user_id: i64,
    pub full_name: String,
    pub joined_at: DateTime<Utc>,
}

/// Access a user has on a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    None,
    View,
    Edit,
}

impl Access {
    pub fn can_view(self) -> bool {
        self >= Access::View
    }

    pub fn can_edit(self) -> bool {
        self == Access::Edit
    }
}

/// A lock acquisition request, evaluated atomically by the store
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub document_id: i64,
    pub section_id: i64,
    pub user_id: i64,
    pub now: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LockAttempt {
    /// The lock is now held by the requester (created, extended or taken over)
    Granted(SectionLockRow),
    /// A live lock of another user blocks the request
    Held(SectionLockRow),
}

#[derive(Debug, Clone)]
pub struct NewSection {
    pub document_id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub content: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct SectionPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct SectionMove {
    /// `None` keeps the parent, `Some(None)` moves to the root level
    pub parent_id: Option<Option<i64>>,
    pub position: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct SectionUpdateOutcome {
    pub section: SectionRow,
    pub revision: Option<SectionRevisionRow>,
}

/// Relational store behind the collaboration engine.
///
/// Implementations must evaluate [`CollabStore::acquire_lock`] atomically with respect to
/// the one-lock-per-section invariant, and keep at most one open session per
/// (document, user) pair.
#[async_trait]
pub trait CollabStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get_document(&self, document_id: i64) -> Result<Option<DocumentRow>, StoreError>;

    async fn document_access(&self, document_id: i64, user_id: i64) -> Result<Access, StoreError>;

    /// Open a session unless one is already open. Returns `true` when a session was created.
    async fn open_session(&self, document_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Close the open session, if any. Returns `true` when a session was closed.
    async fn close_session(&self, document_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn active_users(&self, document_id: i64) -> Result<Vec<ActiveUserRow>, StoreError>;

    async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn acquire_lock(&self, request: &LockRequest) -> Result<LockAttempt, StoreError>;

    /// Delete the lock if `user_id` holds it. Returns `true` only when a live lock was removed.
    async fn release_lock(&self, section_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn get_lock(&self, section_id: i64) -> Result<Option<SectionLockRow>, StoreError>;

    async fn get_section(&self, section_id: i64) -> Result<Option<SectionRow>, StoreError>;

    async fn list_sections(&self, document_id: i64) -> Result<Vec<SectionRow>, StoreError>;

    async fn create_section(&self, section: &NewSection, now: DateTime<Utc>) -> Result<SectionRow, StoreError>;

    /// Apply a patch, capturing a revision of the prior content in the same unit of work
    async fn update_section(
        &self,
        section_id: i64,
        patch: &SectionPatch,
        editor_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<SectionUpdateOutcome, StoreError>;

    async fn move_section(&self, section_id: i64, target: &SectionMove, now: DateTime<Utc>) -> Result<SectionRow, StoreError>;

    async fn delete_section(&self, section_id: i64) -> Result<(), StoreError>;

    /// Revisions of a section, newest first
    async fn list_revisions(&self, section_id: i64) -> Result<Vec<SectionRevisionRow>, StoreError>;
}
