use std::sync::Arc;
use tracing::debug;

use crate::db::store::{CollabStore, SectionRevisionRow, SectionRow, StoreError};

/// Prior content of a section that must be kept before an overwrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRevision {
    pub section_id: i64,
    pub user_id: i64,
    pub content: String,
}

/// Decide whether an update must capture a revision.
///
/// A revision is due only when new content is supplied, it differs from the current
/// content, and the editing user is known. The revision holds the content being replaced.
pub fn capture_before_update(current: &SectionRow, new_content: Option<&str>, editor_id: Option<i64>) -> Option<PendingRevision> {
    let new_content = new_content?;
    let user_id = editor_id?;
    let current_content = current.content.as_deref().unwrap_or("");
    if new_content == current_content {
        return None;
    }

    debug!("Capturing revision of section {} before update by user {}", current.id, user_id);
    Some(PendingRevision {
        section_id: current.id,
        user_id,
        content: current_content.to_string(),
    })
}

/// Read side of the append-only revision history
#[derive(Clone)]
pub struct RevisionRecorder {
    store: Arc<dyn CollabStore>,
}

impl RevisionRecorder {
    pub fn new(store: Arc<dyn CollabStore>) -> Self {
        Self { store }
    }

    /// Revisions of a section, newest first
    pub async fn history(&self, section_id: i64) -> Result<Vec<SectionRevisionRow>, StoreError> {
        self.store.list_revisions(section_id).await
    }
}
