//! Health / heartbeat endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_health))]
pub struct HealthApi;

/// Register health-check routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Heartbeat endpoint.
///
/// Returns `{"status": "ok", "version": "...", "dispatcher": true}` with HTTP
/// 200. `dispatcher` turns false once the room loop has stopped.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health(State(state): State<Arc<AppState>>) -> Json<Value> {
    health_body(!state.dispatcher.is_closed())
}

fn health_body(dispatcher: bool) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "dispatcher": dispatcher,
    }))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn health_response_has_ok_status() {
        let Json(body) = health_body(true);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["dispatcher"], true);
    }

    #[test]
    fn health_response_has_version() {
        let Json(body) = health_body(false);
        assert!(!body["version"].as_str().unwrap_or("").is_empty());
    }
}
