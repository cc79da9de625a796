//! Session routes for the authenticated caller.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use tracing::info;
use utoipa::{OpenApi, ToSchema};

use crate::middleware::AuthUser;
use crate::schemas::projects::MessageResponse;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(profile, logout), components(schemas(ProfileResponse, MessageResponse)))]
pub struct UsersApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/users/profile", get(profile))
        .route("/users/logout", post(logout))
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfileResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
}

#[utoipa::path(
    get,
    path = "/users/profile",
    tag = "users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "The caller", body = ProfileResponse),
        (status = 401, description = "Missing or rejected token"),
    )
)]
pub async fn profile(Extension(user): Extension<AuthUser>) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        id: user.user_id().to_owned(),
        email: user.claims.email.clone(),
    })
}

/// Revoke the presented token. Later REST calls and socket handshakes with
/// it are rejected.
#[utoipa::path(
    post,
    path = "/users/logout",
    tag = "users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Token revoked", body = MessageResponse),
        (status = 401, description = "Missing or rejected token"),
    )
)]
pub async fn logout(State(state): State<Arc<AppState>>, Extension(user): Extension<AuthUser>) -> Json<MessageResponse> {
    state.verifier.revoke(&user.token, user.claims.exp);
    info!(user = %user.user_id(), "user logged out");
    Json(MessageResponse {
        message: "Logged out successfully".into(),
    })
}
