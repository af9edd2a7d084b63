use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

use crate::{
    auth::auth,
    db::store::{NewSection, SectionMove, SectionPatch},
    handlers::section_error,
    models::{
        ApiError, CreateSectionRequest, DeleteResponse, MoveSectionRequest, SectionResponse, SectionTreeResponse,
        UpdateSectionRequest, UpdateSectionResponse,
    },
    services::auth_service::AuthUser,
    state::AppState,
};

/// Section hierarchy of a document
pub async fn list_sections(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(document_id): Path<i64>,
) -> Result<(StatusCode, Json<SectionTreeResponse>), ApiError> {
    auth::ensure_can_view(&state, document_id, &user).await?;

    let sections = state.sections.hierarchy(document_id).await.map_err(section_error)?;
    Ok((StatusCode::OK, Json(SectionTreeResponse { document_id, sections })))
}

pub async fn create_section(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(document_id): Path<i64>,
    Json(request): Json<CreateSectionRequest>,
) -> Result<(StatusCode, Json<SectionResponse>), ApiError> {
    auth::ensure_can_edit(&state, document_id, &user).await?;

    let section = state
        .sections
        .create(NewSection {
            document_id,
            parent_id: request.parent_id,
            title: request.title,
            content: request.content,
            position: request.position,
        })
        .await
        .map_err(section_error)?;
    Ok((StatusCode::CREATED, Json(section.into())))
}

pub async fn get_section(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(section_id): Path<i64>,
) -> Result<(StatusCode, Json<SectionResponse>), ApiError> {
    let section = state.sections.get(section_id).await.map_err(section_error)?;
    auth::ensure_can_view(&state, section.document_id, &user).await?;
    Ok((StatusCode::OK, Json(section.into())))
}

/// Update title, content or position. The replaced content is kept as a revision.
pub async fn update_section(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(section_id): Path<i64>,
    Json(request): Json<UpdateSectionRequest>,
) -> Result<(StatusCode, Json<UpdateSectionResponse>), ApiError> {
    let section = state.sections.get(section_id).await.map_err(section_error)?;
    auth::ensure_can_edit(&state, section.document_id, &user).await?;

    let patch = SectionPatch {
        title: request.title,
        content: request.content,
        position: request.position,
    };
    let outcome = state
        .sections
        .update(section_id, patch, user.user_id)
        .await
        .map_err(section_error)?;

    Ok((
        StatusCode::OK,
        Json(UpdateSectionResponse {
            section: outcome.section.into(),
            revision_recorded: outcome.revision.is_some(),
        }),
    ))
}

pub async fn move_section(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(section_id): Path<i64>,
    Json(request): Json<MoveSectionRequest>,
) -> Result<(StatusCode, Json<SectionResponse>), ApiError> {
    let section = state.sections.get(section_id).await.map_err(section_error)?;
    auth::ensure_can_edit(&state, section.document_id, &user).await?;

    let target = SectionMove { parent_id: request.parent_id, position: request.position };
    let moved = state
        .sections
        .move_to(section_id, target, user.user_id)
        .await
        .map_err(section_error)?;
    Ok((StatusCode::OK, Json(moved.into())))
}

/// Delete a section together with its subsections
pub async fn delete_section(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(section_id): Path<i64>,
) -> Result<(StatusCode, Json<DeleteResponse>), ApiError> {
    let section = state.sections.get(section_id).await.map_err(section_error)?;
    auth::ensure_can_edit(&state, section.document_id, &user).await?;

    state
        .sections
        .delete(section_id, user.user_id)
        .await
        .map_err(section_error)?;
    Ok((StatusCode::OK, Json(DeleteResponse { success: true })))
}
