use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use devroom_core::{Claims, TokenVerifier, bearer_token};

use crate::error::ServerError;
use crate::state::AppState;

/// The authenticated caller of a REST route.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: Claims,
    /// The raw credential, kept so it can be revoked on logout.
    pub token: String,
}

impl AuthUser {
    pub fn user_id(&self) -> &str {
        self.claims.user_id()
    }
}

/// Reject requests without a valid `Authorization: Bearer` token and expose
/// the caller as an [`AuthUser`] extension.
pub async fn require_user(State(state): State<Arc<AppState>>, mut req: Request<Body>, next: Next) -> Response {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(token) = bearer_token(None, header_value).map(str::to_owned) else {
        return ServerError::Unauthorized("authentication required".into()).into_response();
    };
    match state.verifier.verify(&token) {
        Ok(claims) => {
            req.extensions_mut().insert(AuthUser { claims, token });
            next.run(req).await
        }
        Err(e) => ServerError::from(e).into_response(),
    }
}
