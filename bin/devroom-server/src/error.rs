//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON body with an
//! appropriate status code.
//!
//! Internal errors (database, persistence) are logged with full detail but only
//! a generic message is returned to the caller.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use devroom_core::{AuthError, DispatchError, GatewayError, PersistenceError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// All errors that can occur in the devroom-server request lifecycle.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A socket handshake was rejected.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Missing or rejected bearer credential on a REST route.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Authenticated, but not a member of the project.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        ServerError::Unauthorized(e.to_string())
    }
}

impl ServerError {
    fn status(&self) -> StatusCode {
        match self {
            ServerError::Gateway(e) => match e {
                GatewayError::InvalidProject(_) => StatusCode::BAD_REQUEST,
                GatewayError::AuthenticationRequired | GatewayError::AuthenticationFailed(_) => {
                    StatusCode::UNAUTHORIZED
                }
                GatewayError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
                GatewayError::Dispatcher(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ServerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::Dispatch(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Database(_) | ServerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let client_message = match &self {
            // Client-facing errors: expose the message directly.
            ServerError::Gateway(GatewayError::Dispatcher(_)) | ServerError::Dispatch(_) => {
                error!(error = %self, "dispatcher unavailable");
                "server is shutting down".to_owned()
            }
            ServerError::Gateway(e) => e.to_string(),
            ServerError::Unauthorized(m)
            | ServerError::Forbidden(m)
            | ServerError::NotFound(m)
            | ServerError::BadRequest(m)
            | ServerError::Conflict(m) => m.clone(),

            // Internal errors: log the full detail, return a generic message.
            ServerError::Database(e) => {
                error!(error = %e, "database error");
                "internal server error".to_owned()
            }
            ServerError::Persistence(e) => {
                error!(error = %e, "persistence error");
                "internal server error".to_owned()
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
