use axum::http::StatusCode;
use tracing::warn;

use crate::db::store::Access;
use crate::handlers::store_error;
use crate::models::{api_error, ApiError};
use crate::services::auth_service::AuthUser;
use crate::state::AppState;

/// Resolve the caller's access to a document, failing with 404 for unknown documents
/// and 403 when the access is below `required`.
async fn ensure_access(state: &AppState, document_id: i64, user: &AuthUser, required: Access) -> Result<Access, ApiError> {
    match state.store.get_document(document_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return Err(api_error(StatusCode::NOT_FOUND, format!("Document {} not found", document_id)));
        }
        Err(e) => return Err(store_error(e)),
    }

    let access = state
        .permissions
        .access(document_id, user.user_id)
        .await
        .map_err(store_error)?;
    if access >= required {
        return Ok(access);
    }

    warn!(
        "User {} has {:?} access to document {}, {:?} required",
        user.user_id, access, document_id, required
    );
    Err(api_error(StatusCode::FORBIDDEN, "Access to this document denied"))
}

pub async fn ensure_can_view(state: &AppState, document_id: i64, user: &AuthUser) -> Result<Access, ApiError> {
    ensure_access(state, document_id, user, Access::View).await
}

pub async fn ensure_can_edit(state: &AppState, document_id: i64, user: &AuthUser) -> Result<Access, ApiError> {
    ensure_access(state, document_id, user, Access::Edit).await
}
