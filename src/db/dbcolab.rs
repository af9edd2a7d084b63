use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::time::Duration;
use tracing::{error, info, warn};

use super::store::{
    Access, ActiveUserRow, CollabStore, DocumentRow, LockAttempt, LockRequest, NewSection, SectionLockRow, SectionMove,
    SectionPatch, SectionRevisionRow, SectionRow, SectionUpdateOutcome, StoreError,
};
use crate::services::revision_service::capture_before_update;
use crate::services::section_tree::{self, PositionChange};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Attempts of the lock upsert when the competing row disappears between statements
const LOCK_ATTEMPTS: usize = 3;

const SECTION_COLUMNS: &str = "id, document_id, parent_id, title, content, position, modified_at";

/// Postgres backed collaboration store
pub struct PgCollabStore {
    pool: PgPool,
}

impl PgCollabStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    /// * `max_connections` - Upper bound of pooled connections
    ///
    /// # Returns
    /// * `Result<Self, SqlxError>` - Database connection pool or error
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2) // Keep some connections alive
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the collaboration tables when they are missing
    pub async fn ensure_schema(&self) -> Result<(), SqlxError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("Database schema verified");
        Ok(())
    }

    /// Begin a transaction, logging pool pressure first
    async fn begin(&self, what: &str) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, SqlxError> {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        info!(
            "{}. Pool connections: {} idle, {} in use",
            what,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );

        match self.pool.begin().await {
            Ok(tx) => Ok(tx),
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool: {}. Pool state: {} idle, {} total",
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                Err(e)
            }
        }
    }
}

/// Serialize structural changes of one document
async fn lock_document(conn: &mut PgConnection, document_id: i64) -> Result<(), StoreError> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM documents WHERE id = $1 FOR UPDATE")
        .bind(document_id)
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(_) => Ok(()),
        None => Err(StoreError::NotFound(format!("Document {}", document_id))),
    }
}

async fn fetch_section(conn: &mut PgConnection, section_id: i64) -> Result<SectionRow, StoreError> {
    let query_sql = format!("SELECT {} FROM document_sections WHERE id = $1", SECTION_COLUMNS);
    sqlx::query_as::<_, SectionRow>(&query_sql)
        .bind(section_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Section {}", section_id)))
}

/// Lock the owning document of a section and return the section as seen under that lock
async fn lock_section_document(conn: &mut PgConnection, section_id: i64) -> Result<SectionRow, StoreError> {
    let section = fetch_section(conn, section_id).await?;
    lock_document(conn, section.document_id).await?;
    fetch_section(conn, section_id).await
}

async fn load_sections(conn: &mut PgConnection, document_id: i64) -> Result<Vec<SectionRow>, SqlxError> {
    let query_sql = format!(
        "SELECT {} FROM document_sections WHERE document_id = $1 ORDER BY parent_id NULLS FIRST, position, id",
        SECTION_COLUMNS
    );
    sqlx::query_as::<_, SectionRow>(&query_sql)
        .bind(document_id)
        .fetch_all(&mut *conn)
        .await
}

async fn apply_changes(conn: &mut PgConnection, changes: &[PositionChange]) -> Result<(), SqlxError> {
    for change in changes {
        sqlx::query("UPDATE document_sections SET parent_id = $1, position = $2 WHERE id = $3")
            .bind(change.parent_id)
            .bind(change.position)
            .bind(change.id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl CollabStore for PgCollabStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_document(&self, document_id: i64) -> Result<Option<DocumentRow>, StoreError> {
        let document = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, title, owner_id, collaboration_enabled, last_collaboration FROM documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(document)
    }

    async fn document_access(&self, document_id: i64, user_id: i64) -> Result<Access, StoreError> {
        let query_sql = r#"
            SELECT d.owner_id, c.permission_level
            FROM documents d
                LEFT JOIN document_collaborators c ON c.document_id = d.id AND c.user_id = $2
            WHERE d.id = $1
        "#;
        let row: Option<(i64, Option<String>)> = sqlx::query_as(query_sql)
            .bind(document_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            None => Access::None,
            Some((owner_id, _)) if owner_id == user_id => Access::Edit,
            Some((_, Some(level))) if level == "edit" => Access::Edit,
            Some((_, Some(_))) => Access::View,
            Some((_, None)) => Access::None,
        })
    }

    async fn open_session(&self, document_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tx = self.begin(&format!("Opening session of user {} on document {}", user_id, document_id)).await?;

        let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("Document {}", document_id)));
        }

        // The partial unique index keeps a single open session per (document, user)
        let query_sql = r#"
            INSERT INTO collaboration_sessions (document_id, user_id, started_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (document_id, user_id) WHERE ended_at IS NULL DO NOTHING
            RETURNING id;
        "#;
        let inserted: Option<(i64,)> = sqlx::query_as(query_sql)
            .bind(document_id)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        if inserted.is_some() {
            sqlx::query("UPDATE documents SET last_collaboration = $1 WHERE id = $2")
                .bind(now)
                .bind(document_id)
                .execute(&mut *tx)
                .await?;
        }

        // Session row and document stamp commit together
        tx.commit().await?;
        Ok(inserted.is_some())
    }

    async fn close_session(&self, document_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE collaboration_sessions SET ended_at = $1 WHERE document_id = $2 AND user_id = $3 AND ended_at IS NULL",
        )
        .bind(now)
        .bind(document_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_users(&self, document_id: i64) -> Result<Vec<ActiveUserRow>, StoreError> {
        let query_sql = r#"
            SELECT s.user_id, u.full_name, s.started_at AS joined_at
            FROM collaboration_sessions s
                JOIN users u ON u.id = s.user_id
            WHERE s.document_id = $1
                AND s.ended_at IS NULL
            ORDER BY s.started_at, s.user_id
        "#;
        let users = sqlx::query_as::<_, ActiveUserRow>(query_sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(users)
    }

    async fn sweep_expired_locks(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM section_locks WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn acquire_lock(&self, request: &LockRequest) -> Result<LockAttempt, StoreError> {
        // One constrained upsert decides ownership: it only writes when the row is
        // missing, already ours, or expired.
        let upsert_sql = r#"
            INSERT INTO section_locks (section_id, user_id, locked_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (section_id) DO UPDATE
                SET user_id = EXCLUDED.user_id,
                    locked_at = CASE
                        WHEN section_locks.user_id = EXCLUDED.user_id AND section_locks.expires_at > EXCLUDED.locked_at
                        THEN section_locks.locked_at
                        ELSE EXCLUDED.locked_at
                    END,
                    expires_at = EXCLUDED.expires_at
                WHERE section_locks.user_id = EXCLUDED.user_id
                    OR section_locks.expires_at <= EXCLUDED.locked_at
            RETURNING section_id, user_id, locked_at, expires_at;
        "#;

        for attempt in 1..=LOCK_ATTEMPTS {
            let mut tx = self
                .begin(&format!("Locking section {} for user {}", request.section_id, request.user_id))
                .await?;

            let granted = sqlx::query_as::<_, SectionLockRow>(upsert_sql)
                .bind(request.section_id)
                .bind(request.user_id)
                .bind(request.now)
                .bind(request.expires_at)
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(lock) = granted {
                sqlx::query("UPDATE documents SET collaboration_enabled = TRUE, last_collaboration = $1 WHERE id = $2")
                    .bind(request.now)
                    .bind(request.document_id)
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
                return Ok(LockAttempt::Granted(lock));
            }

            let holder = sqlx::query_as::<_, SectionLockRow>(
                "SELECT section_id, user_id, locked_at, expires_at FROM section_locks WHERE section_id = $1",
            )
            .bind(request.section_id)
            .fetch_optional(&mut *tx)
            .await?;
            tx.commit().await?;

            match holder {
                Some(lock) if lock.user_id != request.user_id && lock.is_live(request.now) => {
                    return Ok(LockAttempt::Held(lock));
                }
                _ => warn!(
                    "Lock on section {} changed hands during acquisition (attempt {}/{})",
                    request.section_id, attempt, LOCK_ATTEMPTS
                ),
            }
        }

        error!("Giving up locking section {} after {} attempts", request.section_id, LOCK_ATTEMPTS);
        Err(StoreError::Rejected(format!("Section {} lock is contended, try again", request.section_id)))
    }

    async fn release_lock(&self, section_id: i64, user_id: i64, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let removed: Option<(DateTime<Utc>,)> =
            sqlx::query_as("DELETE FROM section_locks WHERE section_id = $1 AND user_id = $2 RETURNING expires_at")
                .bind(section_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(matches!(removed, Some((expires_at,)) if expires_at > now))
    }

    async fn get_lock(&self, section_id: i64) -> Result<Option<SectionLockRow>, StoreError> {
        let lock = sqlx::query_as::<_, SectionLockRow>(
            "SELECT section_id, user_id, locked_at, expires_at FROM section_locks WHERE section_id = $1",
        )
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lock)
    }

    async fn get_section(&self, section_id: i64) -> Result<Option<SectionRow>, StoreError> {
        let query_sql = format!("SELECT {} FROM document_sections WHERE id = $1", SECTION_COLUMNS);
        let section = sqlx::query_as::<_, SectionRow>(&query_sql)
            .bind(section_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(section)
    }

    async fn list_sections(&self, document_id: i64) -> Result<Vec<SectionRow>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_sections(&mut conn, document_id).await?)
    }

    async fn create_section(&self, section: &NewSection, now: DateTime<Utc>) -> Result<SectionRow, StoreError> {
        let mut tx = self.begin(&format!("Creating section in document {}", section.document_id)).await?;

        lock_document(&mut tx, section.document_id).await?;
        let sections = load_sections(&mut tx, section.document_id).await?;
        let (position, changes) = section_tree::plan_insert(&sections, section.parent_id, section.position)?;
        apply_changes(&mut tx, &changes).await?;

        let query_sql = format!(
            r#"
            INSERT INTO document_sections (document_id, parent_id, title, content, position, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING {};
            "#,
            SECTION_COLUMNS
        );
        let row = sqlx::query_as::<_, SectionRow>(&query_sql)
            .bind(section.document_id)
            .bind(section.parent_id)
            .bind(&section.title)
            .bind(&section.content)
            .bind(position)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        info!("Section {} created in document {}", row.id, row.document_id);
        Ok(row)
    }

    async fn update_section(
        &self,
        section_id: i64,
        patch: &SectionPatch,
        editor_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<SectionUpdateOutcome, StoreError> {
        let mut tx = self.begin(&format!("Updating section {}", section_id)).await?;
        let current = lock_section_document(&mut tx, section_id).await?;

        // The prior content is captured in the same transaction as the overwrite
        let revision = match capture_before_update(&current, patch.content.as_deref(), editor_id) {
            Some(pending) => {
                let query_sql = r#"
                    INSERT INTO section_revisions (section_id, user_id, content, created_at)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id, section_id, user_id, content, created_at;
                "#;
                let row = sqlx::query_as::<_, SectionRevisionRow>(query_sql)
                    .bind(pending.section_id)
                    .bind(pending.user_id)
                    .bind(&pending.content)
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await?;
                Some(row)
            }
            None => None,
        };

        if let Some(position) = patch.position.filter(|p| *p != current.position) {
            let sections = load_sections(&mut tx, current.document_id).await?;
            let changes = section_tree::plan_reorder(&sections, section_id, position)?;
            apply_changes(&mut tx, &changes).await?;
        }

        let query_sql = format!(
            r#"
            UPDATE document_sections
            SET title = COALESCE($1, title),
                content = COALESCE($2, content),
                modified_at = $3
            WHERE id = $4
            RETURNING {};
            "#,
            SECTION_COLUMNS
        );
        let section = sqlx::query_as::<_, SectionRow>(&query_sql)
            .bind(&patch.title)
            .bind(&patch.content)
            .bind(now)
            .bind(section_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(SectionUpdateOutcome { section, revision })
    }

    async fn move_section(&self, section_id: i64, target: &SectionMove, now: DateTime<Utc>) -> Result<SectionRow, StoreError> {
        let mut tx = self.begin(&format!("Moving section {}", section_id)).await?;
        let current = lock_section_document(&mut tx, section_id).await?;

        let sections = load_sections(&mut tx, current.document_id).await?;
        let plan = section_tree::plan_move(&sections, section_id, target)?;
        apply_changes(&mut tx, &plan.changes).await?;

        let query_sql = format!(
            "UPDATE document_sections SET modified_at = $1 WHERE id = $2 RETURNING {}",
            SECTION_COLUMNS
        );
        let section = sqlx::query_as::<_, SectionRow>(&query_sql)
            .bind(now)
            .bind(section_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(section)
    }

    async fn delete_section(&self, section_id: i64) -> Result<(), StoreError> {
        let mut tx = self.begin(&format!("Deleting section {}", section_id)).await?;
        let current = lock_section_document(&mut tx, section_id).await?;

        let sections = load_sections(&mut tx, current.document_id).await?;
        let (removed, changes) = section_tree::plan_delete(&sections, section_id)?;

        // Locks and revisions of the subtree go with it through ON DELETE CASCADE
        sqlx::query("DELETE FROM document_sections WHERE id = ANY($1)")
            .bind(&removed)
            .execute(&mut *tx)
            .await?;
        apply_changes(&mut tx, &changes).await?;

        tx.commit().await?;
        info!("Section {} deleted with {} descendants", section_id, removed.len().saturating_sub(1));
        Ok(())
    }

    async fn list_revisions(&self, section_id: i64) -> Result<Vec<SectionRevisionRow>, StoreError> {
        let revisions = sqlx::query_as::<_, SectionRevisionRow>(
            "SELECT id, section_id, user_id, content, created_at FROM section_revisions WHERE section_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(revisions)
    }
}
