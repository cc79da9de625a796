//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use devroom_core::{ConnectionGateway, DispatcherHandle, JwtVerifier};

use crate::config::Config;
use crate::entities::SqliteStore;

/// State shared across all HTTP and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Project store; also the realtime core's project directory.
    pub store: Arc<SqliteStore>,
    /// Bearer-token verifier shared by REST routes and the socket gateway.
    pub verifier: Arc<JwtVerifier>,
    pub gateway: ConnectionGateway,
    /// Entry point to the room dispatcher.
    pub dispatcher: DispatcherHandle,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
