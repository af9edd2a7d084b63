use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    auth::auth,
    handlers::{section_error, store_error},
    models::{ApiError, RevisionListResponse},
    services::auth_service::AuthUser,
    state::AppState,
};

/// Revision history of a section, newest first
pub async fn list_revisions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(section_id): Path<i64>,
) -> Result<(StatusCode, Json<RevisionListResponse>), ApiError> {
    let section = state.sections.get(section_id).await.map_err(section_error)?;
    auth::ensure_can_view(&state, section.document_id, &user).await?;

    let revisions = state.revisions.history(section_id).await.map_err(store_error)?;
    Ok((
        StatusCode::OK,
        Json(RevisionListResponse {
            revisions: revisions.into_iter().map(Into::into).collect(),
        }),
    ))
}
