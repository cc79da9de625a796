//! Connection handshake: project resolution and authentication.

use std::sync::Arc;

use devroom_types::{Project, ProjectId, SenderInfo};
use tracing::{info, warn};

use crate::auth::{TokenVerifier, bearer_token};
use crate::directory::ProjectDirectory;
use crate::error::GatewayError;
use crate::room::ConnectionId;

/// State of one authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub user_email: String,
    pub project_id: ProjectId,
    /// Always equal to `project_id`.
    pub room_id: ProjectId,
}

impl Session {
    pub fn sender(&self) -> SenderInfo {
        SenderInfo::new(&self.user_id, &self.user_email)
    }
}

/// What a client presents when connecting.
#[derive(Debug, Clone, Default)]
pub struct HandshakeRequest {
    pub project_id: String,
    /// Explicit token field (query parameter).
    pub auth_token: Option<String>,
    /// Raw `Authorization` header.
    pub authorization: Option<String>,
}

/// A successful handshake.
#[derive(Debug, Clone)]
pub struct Admission {
    pub session: Session,
    /// `None` only when missing projects are admitted.
    pub project: Option<Project>,
}

/// Validates incoming connections before any room traffic is allowed.
#[derive(Clone)]
pub struct ConnectionGateway {
    verifier: Arc<dyn TokenVerifier>,
    directory: Arc<dyn ProjectDirectory>,
    allow_missing_project: bool,
}

impl ConnectionGateway {
    pub fn new(
        verifier: Arc<dyn TokenVerifier>,
        directory: Arc<dyn ProjectDirectory>,
        allow_missing_project: bool,
    ) -> Self {
        Self {
            verifier,
            directory,
            allow_missing_project,
        }
    }

    pub async fn handshake(&self, request: HandshakeRequest) -> Result<Admission, GatewayError> {
        let project_id = ProjectId::parse(&request.project_id)
            .map_err(|_| GatewayError::InvalidProject(request.project_id.clone()))?;

        let project = match self.directory.find_by_id(&project_id).await {
            Ok(project) => project,
            Err(e) => {
                warn!(project = %project_id, error = %e, "project lookup failed");
                None
            }
        };

        let token = bearer_token(request.auth_token.as_deref(), request.authorization.as_deref())
            .ok_or(GatewayError::AuthenticationRequired)?;
        let claims = self.verifier.verify(token)?;

        if project.is_none() && !self.allow_missing_project {
            return Err(GatewayError::ProjectNotFound(project_id));
        }

        let session = Session {
            connection_id: ConnectionId::new(),
            user_id: claims.user_id().to_owned(),
            user_email: claims.email.clone(),
            room_id: project_id.clone(),
            project_id,
        };
        info!(
            user = %session.user_id,
            room = %session.room_id,
            connection = %session.connection_id,
            "user joined room"
        );
        Ok(Admission { session, project })
    }
}
