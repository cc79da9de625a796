//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional Swagger UI / OpenAPI document (disable with `DEVROOM_ENABLE_SWAGGER=false`)
//! - Health / heartbeat route
//! - The `/ws` realtime socket
//! - Bearer-protected `/projects` and `/users` routes

pub mod doc;
mod health;
mod projects;
mod users;
mod ws;

use std::sync::Arc;

use axum::{Router, middleware};
use tower::ServiceBuilder;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors, require_user, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .merge(projects::router())
        .merge(users::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let mut app = Router::new()
        .merge(health::router())
        .merge(ws::router())
        .merge(protected);

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use devroom_core::{
        AugmentationPipeline, ConnectionGateway, Dispatcher, DispatcherDeps, JwtVerifier, ProjectDirectory,
    };
    use devroom_types::{FileTree, ProjectId};
    use http_body_util::BodyExt;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::build;
    use crate::config::Config;
    use crate::entities::SqliteStore;
    use crate::models::gemini::DisabledModel;
    use crate::state::AppState;

    const SECRET: &str = "route-secret";

    async fn app_state() -> Arc<AppState> {
        let config = Config::from_source(|_| None);
        let store = Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap());
        let verifier = Arc::new(JwtVerifier::new(SECRET));
        let dispatcher = Dispatcher::start(
            DispatcherDeps {
                directory: store.clone(),
                pipeline: AugmentationPipeline::new(config.ai_marker.clone(), Arc::new(DisabledModel)),
                sandbox: config.sandbox_provider(),
            },
            16,
        );
        let gateway = ConnectionGateway::new(verifier.clone(), store.clone(), false);
        Arc::new(AppState {
            config: Arc::new(config),
            store,
            verifier,
            gateway,
            dispatcher,
        })
    }

    fn token(user: &str) -> String {
        let exp = chrono::Utc::now().timestamp() as u64 + 3600;
        encode(
            &Header::default(),
            &json!({ "_id": user, "email": format!("{user}@x.io"), "exp": exp }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn call(state: &Arc<AppState>, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token(user)));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        let response = build(state.clone()).oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create(state: &Arc<AppState>, user: &str, name: &str) -> String {
        let (status, body) = call(state, "POST", "/projects/create", Some(user), Some(json!({ "name": name }))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["project"]["_id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn health_is_public() {
        let state = app_state().await;
        let (status, body) = call(&state, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["dispatcher"], true);
    }

    #[tokio::test]
    async fn project_routes_require_a_token() {
        let state = app_state().await;
        let (status, _) = call(&state, "GET", "/projects/all", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn created_project_is_listed_and_fetched() {
        let state = app_state().await;
        let id = create(&state, "u1", "  Demo ").await;

        let (status, body) = call(&state, "GET", "/projects/all", Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["projects"][0]["name"], "demo");

        let (status, body) = call(&state, "GET", &format!("/projects/get-project/{id}"), Some("u1"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["project"]["users"], json!(["u1"]));
        assert_eq!(body["project"]["online"], 0);
    }

    #[tokio::test]
    async fn duplicate_and_blank_names_are_rejected() {
        let state = app_state().await;
        create(&state, "u1", "demo").await;
        let (status, _) = call(&state, "POST", "/projects/create", Some("u2"), Some(json!({ "name": "DEMO" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = call(&state, "POST", "/projects/create", Some("u2"), Some(json!({ "name": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_project_validates_the_id() {
        let state = app_state().await;
        let (status, _) = call(&state, "GET", "/projects/get-project/nope", Some("u1"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let uri = format!("/projects/get-project/{}", ProjectId::generate());
        let (status, _) = call(&state, "GET", &uri, Some("u1"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn file_tree_update_is_persisted_without_a_live_room() {
        let state = app_state().await;
        let id = create(&state, "u1", "demo").await;
        let tree = json!({ "app.js": { "file": { "contents": "console.log(1)" } } });

        let (status, _) = call(
            &state,
            "PUT",
            "/projects/update-file-tree",
            Some("u1"),
            Some(json!({ "projectId": id, "fileTree": tree })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let stored = state
            .store
            .find_by_id(&ProjectId::parse(&id).unwrap())
            .await
            .unwrap()
            .unwrap();
        let mut expected = FileTree::new();
        expected.insert_file("app.js", "console.log(1)");
        assert_eq!(stored.file_tree, expected);
    }

    #[tokio::test]
    async fn non_members_cannot_change_a_project() {
        let state = app_state().await;
        let id = create(&state, "u1", "demo").await;

        let (status, _) = call(
            &state,
            "PUT",
            "/projects/update-file-tree",
            Some("intruder"),
            Some(json!({ "projectId": id, "fileTree": {} })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &state,
            "PUT",
            "/projects/add-user",
            Some("intruder"),
            Some(json!({ "projectId": id, "users": ["intruder"] })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn members_can_add_collaborators() {
        let state = app_state().await;
        let id = create(&state, "u1", "demo").await;
        let (status, body) = call(
            &state,
            "PUT",
            "/projects/add-user",
            Some("u1"),
            Some(json!({ "projectId": id, "users": ["u2", " "] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["project"]["users"], json!(["u1", "u2"]));
    }

    #[tokio::test]
    async fn logout_revokes_the_token() {
        let state = app_state().await;
        let bearer = format!("Bearer {}", token("u1"));
        let request = |method: &str, uri: &str| {
            Request::builder()
                .method(method)
                .uri(uri)
                .header(header::AUTHORIZATION, bearer.clone())
                .body(Body::empty())
                .unwrap()
        };

        let response = build(state.clone()).oneshot(request("GET", "/users/profile")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = build(state.clone()).oneshot(request("POST", "/users/logout")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = build(state.clone()).oneshot(request("GET", "/users/profile")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn socket_handshake_errors_are_plain_http() {
        let state = app_state().await;
        let (status, _) = call(&state, "GET", "/ws?projectId=bad", Some("u1"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let id = create(&state, "u1", "demo").await;
        let (status, _) = call(&state, "GET", &format!("/ws?projectId={id}"), None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let uri = format!("/ws?projectId={}&token={}", ProjectId::generate(), token("u1"));
        let (status, _) = call(&state, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn trace_id_is_echoed() {
        let state = app_state().await;
        let response = build(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key("x-trace-id"));
    }
}
