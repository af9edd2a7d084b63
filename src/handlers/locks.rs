use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Duration;
use std::sync::Arc;
use tracing::info;

use crate::{
    auth::auth,
    handlers::{section_error, store_error},
    models::{
        api_error, ApiError, LockResponse, LockSectionRequest, SectionLockedEvent, SectionUnlockedEvent,
        SendMessage, UnlockResponse,
    },
    services::{auth_service::AuthUser, lease_service::LeaseError},
    state::AppState,
};

/// Acquire or extend the caller's lease on a section
pub async fn lock_section(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(section_id): Path<i64>,
    Json(request): Json<LockSectionRequest>,
) -> Result<(StatusCode, Json<LockResponse>), ApiError> {
    let section = state.sections.get(section_id).await.map_err(section_error)?;
    auth::ensure_can_edit(&state, section.document_id, &user).await?;

    let minutes = state
        .config
        .lease_minutes(request.duration_minutes)
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "duration_minutes must be positive"))?;

    let lease = match state
        .leases
        .acquire(section.document_id, section_id, user.user_id, Some(Duration::minutes(minutes)))
        .await
    {
        Ok(lease) => lease,
        Err(e @ LeaseError::Conflict { .. }) => return Err(api_error(StatusCode::CONFLICT, e.to_string())),
        Err(LeaseError::Storage(e)) => return Err(store_error(e)),
    };

    let event = SendMessage::SectionLocked(SectionLockedEvent {
        section_id,
        user_id: user.user_id,
        expires_at: lease.expires_at,
    });
    let delivered = state.rooms.publish(section.document_id, &event, None);
    info!("Section {} locked over HTTP, {} connections notified", section_id, delivered);

    Ok((StatusCode::OK, Json(lease.into())))
}

/// Release the caller's lease. Releasing a lease held by someone else changes nothing.
pub async fn unlock_section(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(section_id): Path<i64>,
) -> Result<(StatusCode, Json<UnlockResponse>), ApiError> {
    let section = state.sections.get(section_id).await.map_err(section_error)?;
    auth::ensure_can_edit(&state, section.document_id, &user).await?;

    let released = state
        .leases
        .release(section_id, user.user_id)
        .await
        .map_err(store_error)?;
    if released {
        let event = SendMessage::SectionUnlocked(SectionUnlockedEvent { section_id, user_id: user.user_id });
        state.rooms.publish(section.document_id, &event, None);
    }

    Ok((StatusCode::OK, Json(UnlockResponse { released })))
}
