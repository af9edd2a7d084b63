use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Store is reachable", body = HealthResponse),
        (status = 503, description = "Store is not reachable", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Section hierarchy of a document
#[utoipa::path(
    get,
    path = "/api/v1/documents/{document_id}/sections",
    params(("document_id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Sections ordered by position at every level", body = SectionTreeResponse),
        (status = 403, description = "No access to the document", body = ErrorResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn list_sections_doc() {}

/// Create a section
#[utoipa::path(
    post,
    path = "/api/v1/documents/{document_id}/sections",
    params(("document_id" = i64, Path, description = "Document id")),
    request_body = CreateSectionRequest,
    responses(
        (status = 201, description = "Section created", body = SectionResponse),
        (status = 403, description = "Edit permission required", body = ErrorResponse),
        (status = 422, description = "Parent is not part of the document", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn create_section_doc() {}

/// Get a section
#[utoipa::path(
    get,
    path = "/api/v1/sections/{section_id}",
    params(("section_id" = i64, Path, description = "Section id")),
    responses(
        (status = 200, description = "The section", body = SectionResponse),
        (status = 404, description = "Section not found", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn get_section_doc() {}

/// Update a section, keeping the replaced content as a revision
#[utoipa::path(
    put,
    path = "/api/v1/sections/{section_id}",
    params(("section_id" = i64, Path, description = "Section id")),
    request_body = UpdateSectionRequest,
    responses(
        (status = 200, description = "Section updated", body = UpdateSectionResponse),
        (status = 409, description = "Another user holds the section's lock", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn update_section_doc() {}

/// Delete a section and its subsections
#[utoipa::path(
    delete,
    path = "/api/v1/sections/{section_id}",
    params(("section_id" = i64, Path, description = "Section id")),
    responses(
        (status = 200, description = "Section deleted", body = DeleteResponse),
        (status = 409, description = "Another user holds the section's lock", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn delete_section_doc() {}

/// Move a section to another parent or position
#[utoipa::path(
    post,
    path = "/api/v1/sections/{section_id}/move",
    params(("section_id" = i64, Path, description = "Section id")),
    request_body = MoveSectionRequest,
    responses(
        (status = 200, description = "Section moved", body = SectionResponse),
        (status = 422, description = "Move would create a cycle", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn move_section_doc() {}

/// Acquire or extend a lock on a section
#[utoipa::path(
    post,
    path = "/api/v1/sections/{section_id}/lock",
    params(("section_id" = i64, Path, description = "Section id")),
    request_body = LockSectionRequest,
    responses(
        (status = 200, description = "Lock held by the caller", body = LockResponse),
        (status = 400, description = "Invalid duration", body = ErrorResponse),
        (status = 409, description = "Locked by another user", body = ErrorResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn lock_section_doc() {}

/// Release the caller's lock on a section
#[utoipa::path(
    post,
    path = "/api/v1/sections/{section_id}/unlock",
    params(("section_id" = i64, Path, description = "Section id")),
    responses(
        (status = 200, description = "Whether a lock was released", body = UnlockResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn unlock_section_doc() {}

/// Revision history of a section, newest first
#[utoipa::path(
    get,
    path = "/api/v1/sections/{section_id}/revisions",
    params(("section_id" = i64, Path, description = "Section id")),
    responses(
        (status = 200, description = "Revisions", body = RevisionListResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn list_revisions_doc() {}

/// Room, connection and host statistics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Diagnostics", body = DiagnosticsResponse)
    ),
    security(("bearer" = []))
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        list_sections_doc,
        create_section_doc,
        get_section_doc,
        update_section_doc,
        delete_section_doc,
        move_section_doc,
        lock_section_doc,
        unlock_section_doc,
        list_revisions_doc,
        diagnostics_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ErrorResponse,
            DiagnosticsResponse,
            SectionResponse,
            SectionNode,
            SectionTreeResponse,
            CreateSectionRequest,
            UpdateSectionRequest,
            UpdateSectionResponse,
            MoveSectionRequest,
            LockSectionRequest,
            LockResponse,
            UnlockResponse,
            DeleteResponse,
            RevisionResponse,
            RevisionListResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "api", description = "Section collaboration endpoints")
    )
)]
pub struct ApiDoc;
