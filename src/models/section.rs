use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::store::{SectionLockRow, SectionRevisionRow, SectionRow};

/// A section as returned by the REST API
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct SectionResponse {
    pub id: i64,
    pub document_id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub content: Option<String>,
    pub position: i32,
    pub modified_at: DateTime<Utc>,
}

impl From<SectionRow> for SectionResponse {
    fn from(row: SectionRow) -> Self {
        Self {
            id: row.id,
            document_id: row.document_id,
            parent_id: row.parent_id,
            title: row.title,
            content: row.content,
            position: row.position,
            modified_at: row.modified_at,
        }
    }
}

/// Node of a document's section hierarchy
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct SectionNode {
    pub id: i64,
    pub title: String,
    pub position: i32,
    pub modified_at: DateTime<Utc>,
    pub children: Vec<SectionNode>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct SectionTreeResponse {
    pub document_id: i64,
    pub sections: Vec<SectionNode>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct CreateSectionRequest {
    pub title: String,
    pub content: Option<String>,
    pub parent_id: Option<i64>,
    pub position: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Default, ToSchema)]
pub struct UpdateSectionRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub position: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct UpdateSectionResponse {
    pub section: SectionResponse,
    /// Whether the prior content was kept as a revision
    pub revision_recorded: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, ToSchema)]
pub struct MoveSectionRequest {
    /// Absent keeps the current parent, `null` moves the section to the root level
    #[serde(default, with = "::serde_with::rust::double_option", skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<i64>)]
    pub parent_id: Option<Option<i64>>,
    pub position: Option<i32>,
}

#[derive(Serialize, Deserialize, Debug, Default, ToSchema)]
pub struct LockSectionRequest {
    pub duration_minutes: Option<i64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct LockResponse {
    pub section_id: i64,
    pub user_id: i64,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<SectionLockRow> for LockResponse {
    fn from(row: SectionLockRow) -> Self {
        Self {
            section_id: row.section_id,
            user_id: row.user_id,
            locked_at: row.locked_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct UnlockResponse {
    pub released: bool,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct RevisionResponse {
    pub id: i64,
    pub section_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<SectionRevisionRow> for RevisionResponse {
    fn from(row: SectionRevisionRow) -> Self {
        Self {
            id: row.id,
            section_id: row.section_id,
            user_id: row.user_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct RevisionListResponse {
    pub revisions: Vec<RevisionResponse>,
}
