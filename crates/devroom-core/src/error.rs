//! Error taxonomy of the realtime core.
//!
//! Gateway errors are connection-fatal. Everything else is contained to the
//! operation that raised it: model errors degrade to a fallback reply,
//! persistence errors are logged, sandbox errors go to the invoking client.

use devroom_types::ProjectId;
use thiserror::Error;

/// Token verification failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("token expired")]
    Expired,

    #[error("token revoked")]
    Revoked,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Handshake rejections. None of them leaves a partial session behind.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The project id is not syntactically valid; rejected before any lookup.
    #[error("invalid project id: {0:?}")]
    InvalidProject(String),

    #[error("authentication required")]
    AuthenticationRequired,

    #[error("authentication failed: {0}")]
    AuthenticationFailed(#[from] AuthError),

    /// The id is well formed but no such project exists.
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("dispatcher unavailable")]
    Dispatcher(#[from] DispatchError),
}

/// Failures of the generative model service.
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("model service not configured")]
    NotConfigured,

    #[error("model transport error: {0}")]
    Transport(String),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no content")]
    EmptyResponse,
}

/// Failures of the project directory.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    #[error("project {0} does not exist")]
    MissingProject(ProjectId),

    #[error("store error: {0}")]
    Store(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Failures of a sandbox run.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to boot sandbox: {0}")]
    Boot(String),

    #[error("sandbox execution is disabled on this server")]
    Disabled,

    #[error("`{0}` is not an allowed sandbox program")]
    CommandNotAllowed(String),

    #[error("path {0:?} escapes the sandbox")]
    InvalidPath(String),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {code:?}")]
    NonZeroExit { command: String, code: Option<i32> },

    #[error("sandbox runtime died: {0}")]
    RuntimeDied(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The dispatcher loop is gone (server shutting down).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("dispatcher closed")]
    Closed,
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DispatchError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DispatchError::Closed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for DispatchError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        DispatchError::Closed
    }
}
