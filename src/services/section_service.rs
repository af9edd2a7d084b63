use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::store::{
    CollabStore, NewSection, SectionMove, SectionPatch, SectionRow, SectionUpdateOutcome, StoreError,
};
use crate::models::SectionNode;
use crate::services::lease_service::LeaseManager;
use crate::services::section_tree::build_tree;
use crate::utils::clock::Clock;

#[derive(Debug, Error)]
pub enum SectionError {
    #[error("Section is locked by user {held_by} until {expires_at}")]
    Locked { held_by: i64, expires_at: DateTime<Utc> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Section CRUD as exposed over HTTP
pub struct SectionService {
    store: Arc<dyn CollabStore>,
    leases: Arc<LeaseManager>,
    clock: Arc<dyn Clock>,
}

impl SectionService {
    pub fn new(store: Arc<dyn CollabStore>, leases: Arc<LeaseManager>, clock: Arc<dyn Clock>) -> Self {
        Self { store, leases, clock }
    }

    pub async fn create(&self, section: NewSection) -> Result<SectionRow, SectionError> {
        let created = self.store.create_section(&section, self.clock.now()).await?;
        info!(
            "Section {} created in document {} at position {}",
            created.id, created.document_id, created.position
        );
        Ok(created)
    }

    pub async fn get(&self, section_id: i64) -> Result<SectionRow, SectionError> {
        self.store
            .get_section(section_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Section {}", section_id)).into())
    }

    /// The document's sections as a tree, ordered by position at every level
    pub async fn hierarchy(&self, document_id: i64) -> Result<Vec<SectionNode>, SectionError> {
        let sections = self.store.list_sections(document_id).await?;
        Ok(build_tree(&sections))
    }

    /// Apply a patch on behalf of `editor_id`. Refused while another user holds a live lock.
    pub async fn update(
        &self,
        section_id: i64,
        patch: SectionPatch,
        editor_id: i64,
    ) -> Result<SectionUpdateOutcome, SectionError> {
        self.ensure_not_locked_by_other(section_id, editor_id).await?;
        let outcome = self
            .store
            .update_section(section_id, &patch, Some(editor_id), self.clock.now())
            .await?;
        if outcome.revision.is_some() {
            info!("Section {} updated by user {} with a new revision", section_id, editor_id);
        }
        Ok(outcome)
    }

    pub async fn move_to(&self, section_id: i64, target: SectionMove, user_id: i64) -> Result<SectionRow, SectionError> {
        self.ensure_not_locked_by_other(section_id, user_id).await?;
        let moved = self.store.move_section(section_id, &target, self.clock.now()).await?;
        info!(
            "Section {} moved under {:?} at position {}",
            moved.id, moved.parent_id, moved.position
        );
        Ok(moved)
    }

    pub async fn delete(&self, section_id: i64, user_id: i64) -> Result<(), SectionError> {
        self.ensure_not_locked_by_other(section_id, user_id).await?;
        self.store.delete_section(section_id).await?;
        info!("Section {} deleted by user {}", section_id, user_id);
        Ok(())
    }

    async fn ensure_not_locked_by_other(&self, section_id: i64, user_id: i64) -> Result<(), SectionError> {
        match self.leases.live_lease(section_id).await? {
            Some(lease) if lease.user_id != user_id => {
                warn!(
                    "User {} was refused a change to section {} locked by user {}",
                    user_id, section_id, lease.user_id
                );
                Err(SectionError::Locked { held_by: lease.user_id, expires_at: lease.expires_at })
            }
            _ => Ok(()),
        }
    }
}
