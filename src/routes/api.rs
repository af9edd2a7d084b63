use crate::{
    handlers::{
        create_section, delete_section, diagnostics, get_section, health_check, list_revisions, list_sections,
        lock_section, move_section, ready_check, unlock_section, update_section,
    },
    routes::auth_middleware::auth_middleware,
    state::AppState,
    websocket::handler::websocket_handler,
};
use axum::{middleware, routing::{get, post}, Router};
use std::sync::Arc;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    let public = Router::<Arc<AppState>>::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check));

    let protected = Router::<Arc<AppState>>::new()
        .route("/v1/documents/:document_id/sections", get(list_sections).post(create_section))
        .route(
            "/v1/sections/:section_id",
            get(get_section).put(update_section).delete(delete_section),
        )
        .route("/v1/sections/:section_id/move", post(move_section))
        .route("/v1/sections/:section_id/lock", post(lock_section))
        .route("/v1/sections/:section_id/unlock", post(unlock_section))
        .route("/v1/sections/:section_id/revisions", get(list_revisions))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/ws", get(websocket_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)); // Applies to all routes added above

    public.merge(protected).with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::memstore::MemoryCollabStore;
    use crate::db::store::{Access, CollabStore, NewSection};
    use crate::services::auth_service::testing::token_for;
    use crate::utils::clock::SystemClock;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use chrono::Utc;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";
    const DOC: i64 = 10;
    const OWNER: i64 = 1;
    const EDITOR: i64 = 2;
    const VIEWER: i64 = 3;

    async fn app() -> (Router, i64) {
        let store = Arc::new(MemoryCollabStore::new());
        store.insert_user(OWNER, "Ada Lovelace");
        store.insert_user(EDITOR, "Alan Turing");
        store.insert_user(VIEWER, "Grace Hopper");
        store.insert_document(DOC, "Paper", OWNER);
        store.add_collaborator(DOC, EDITOR, Access::Edit);
        store.add_collaborator(DOC, VIEWER, Access::View);
        let section = store
            .create_section(
                &NewSection {
                    document_id: DOC,
                    parent_id: None,
                    title: "Intro".to_string(),
                    content: Some("draft".to_string()),
                    position: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let config = Config { auth_jwt_secret: Some(SECRET.to_string()), ..Config::default() };
        let state = Arc::new(AppState::new(config, store, Arc::new(SystemClock)));
        (create_api_routes(state), section.id)
    }

    async fn call(app: &Router, method: Method, uri: &str, user: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user_id) = user {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(json!(user_id), SECRET)));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_and_readiness_need_no_token() {
        let (app, _) = app().await;
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, _) = call(&app, Method::GET, "/ready", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_routes_require_a_valid_token() {
        let (app, _) = app().await;
        let uri = format!("/v1/documents/{}/sections", DOC);
        let (status, _) = call(&app, Method::GET, &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri(&uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token_for(json!(OWNER), "wrong")))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn sections_are_created_and_listed_as_a_tree() {
        let (app, intro) = app().await;
        let uri = format!("/v1/documents/{}/sections", DOC);

        let (status, created) = call(
            &app,
            Method::POST,
            &uri,
            Some(EDITOR),
            Some(json!({ "title": "Background", "parent_id": intro })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["position"], 1);

        let (status, tree) = call(&app, Method::GET, &uri, Some(VIEWER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tree["sections"][0]["title"], "Intro");
        assert_eq!(tree["sections"][0]["children"][0]["title"], "Background");
    }

    #[tokio::test]
    async fn viewers_cannot_change_sections_and_strangers_cannot_read() {
        let (app, intro) = app().await;
        let (status, body) = call(
            &app,
            Method::PUT,
            &format!("/v1/sections/{}", intro),
            Some(VIEWER),
            Some(json!({ "content": "vandalism" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], 403);

        let (status, _) = call(&app, Method::GET, &format!("/v1/sections/{}", intro), Some(99), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::GET, "/v1/documents/404/sections", Some(OWNER), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lock_guards_updates_and_history_keeps_replaced_content() {
        let (app, intro) = app().await;
        let lock_uri = format!("/v1/sections/{}/lock", intro);
        let section_uri = format!("/v1/sections/{}", intro);

        let (status, lease) = call(&app, Method::POST, &lock_uri, Some(OWNER), Some(json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(lease["user_id"], OWNER);

        let (status, _) = call(&app, Method::POST, &lock_uri, Some(EDITOR), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::PUT, &section_uri, Some(EDITOR), Some(json!({ "content": "mine" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, updated) =
            call(&app, Method::PUT, &section_uri, Some(OWNER), Some(json!({ "content": "final" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["revision_recorded"], true);
        assert_eq!(updated["section"]["content"], "final");

        let (status, history) =
            call(&app, Method::GET, &format!("/v1/sections/{}/revisions", intro), Some(VIEWER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["revisions"].as_array().map(Vec::len), Some(1));
        assert_eq!(history["revisions"][0]["content"], "draft");
    }

    #[tokio::test]
    async fn unlock_by_a_non_holder_releases_nothing() {
        let (app, intro) = app().await;
        call(&app, Method::POST, &format!("/v1/sections/{}/lock", intro), Some(OWNER), Some(json!({}))).await;

        let unlock_uri = format!("/v1/sections/{}/unlock", intro);
        let (status, body) = call(&app, Method::POST, &unlock_uri, Some(EDITOR), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["released"], false);

        let (_, body) = call(&app, Method::POST, &unlock_uri, Some(OWNER), None).await;
        assert_eq!(body["released"], true);
    }

    #[tokio::test]
    async fn non_positive_lock_duration_is_a_bad_request() {
        let (app, intro) = app().await;
        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/v1/sections/{}/lock", intro),
            Some(OWNER),
            Some(json!({ "duration_minutes": 0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn moving_a_section_under_its_child_is_rejected() {
        let (app, intro) = app().await;
        let (_, child) = call(
            &app,
            Method::POST,
            &format!("/v1/documents/{}/sections", DOC),
            Some(OWNER),
            Some(json!({ "title": "Child", "parent_id": intro })),
        )
        .await;

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/v1/sections/{}/move", intro),
            Some(OWNER),
            Some(json!({ "parent_id": child["id"] })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, moved) = call(
            &app,
            Method::POST,
            &format!("/v1/sections/{}/move", child["id"]),
            Some(OWNER),
            Some(json!({ "parent_id": null })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["parent_id"], Value::Null);
        assert_eq!(moved["position"], 2);
    }
}
