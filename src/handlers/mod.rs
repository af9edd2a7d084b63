pub mod health;
pub mod diagnostics;
pub mod sections;
pub mod locks;
pub mod revisions;

pub use health::*;
pub use diagnostics::*;
pub use sections::*;
pub use locks::*;
pub use revisions::*;

use axum::http::StatusCode;
use tracing::error;

use crate::db::store::StoreError;
use crate::models::{api_error, ApiError};
use crate::services::section_service::SectionError;

pub fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(what) => api_error(StatusCode::NOT_FOUND, format!("{} not found", what)),
        StoreError::Rejected(reason) => api_error(StatusCode::UNPROCESSABLE_ENTITY, reason),
        StoreError::Database(e) => {
            error!("Database error: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}

pub fn section_error(e: SectionError) -> ApiError {
    match e {
        SectionError::Locked { .. } => api_error(StatusCode::CONFLICT, e.to_string()),
        SectionError::Store(e) => store_error(e),
    }
}
