//! Thin project routes over the store and the live rooms.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use devroom_core::ProjectDirectory;
use devroom_types::{Project, ProjectId};
use tracing::info;
use utoipa::OpenApi;

use crate::entities::ProjectStore;
use crate::error::ServerError;
use crate::middleware::AuthUser;
use crate::schemas::projects::{
    AddUsersRequest, CreateProjectRequest, ProjectEnvelope, ProjectList, ProjectResponse, UpdateFileTreeRequest,
};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(create_project, list_projects, get_project, add_users, update_file_tree),
    components(schemas(
        CreateProjectRequest,
        UpdateFileTreeRequest,
        AddUsersRequest,
        ProjectResponse,
        ProjectEnvelope,
        ProjectList
    ))
)]
pub struct ProjectsApi;

/// Register project routes. All of them expect an [`AuthUser`].
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects/create", post(create_project))
        .route("/projects/all", get(list_projects))
        .route("/projects/get-project/{id}", get(get_project))
        .route("/projects/add-user", put(add_users))
        .route("/projects/update-file-tree", put(update_file_tree))
}

#[utoipa::path(
    post,
    path = "/projects/create",
    tag = "projects",
    request_body = CreateProjectRequest,
    security(("bearer" = [])),
    responses(
        (status = 201, description = "Project created", body = ProjectEnvelope),
        (status = 400, description = "Missing name"),
        (status = 409, description = "Name already taken"),
    )
)]
pub async fn create_project(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<(axum::http::StatusCode, Json<ProjectEnvelope>), ServerError> {
    let name = req.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(ServerError::BadRequest("name is required".into()));
    }
    let project = match state.store.create_project(&name, user.user_id()).await {
        Ok(project) => project,
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            return Err(ServerError::Conflict(format!("project {name:?} already exists")));
        }
        Err(e) => return Err(e.into()),
    };
    info!(project = %project.id, user = %user.user_id(), "project created");
    Ok((
        axum::http::StatusCode::CREATED,
        Json(ProjectEnvelope {
            project: ProjectResponse::from_project(project, 0),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/projects/all",
    tag = "projects",
    security(("bearer" = [])),
    responses((status = 200, description = "Projects of the caller", body = ProjectList))
)]
pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<ProjectList>, ServerError> {
    let projects = state.store.list_for_user(user.user_id()).await?;
    Ok(Json(ProjectList {
        projects: projects
            .into_iter()
            .map(|p| ProjectResponse::from_project(p, 0))
            .collect(),
    }))
}

/// Stored project, with the live tree when its room is active.
#[utoipa::path(
    get,
    path = "/projects/get-project/{id}",
    tag = "projects",
    params(("id" = String, Path, description = "24-hex project id")),
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Project", body = ProjectEnvelope),
        (status = 400, description = "Malformed id"),
        (status = 404, description = "No such project"),
    )
)]
pub async fn get_project(
    State(state): State<Arc<AppState>>,
    Extension(_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> Result<Json<ProjectEnvelope>, ServerError> {
    let id = parse_id(&id)?;
    let mut project = find(&state, &id).await?;
    if let Some(live) = state.dispatcher.snapshot(id.clone()).await? {
        project.file_tree = (*live).clone();
    }
    let online = state.dispatcher.members(id).await?.len();
    Ok(Json(ProjectEnvelope {
        project: ProjectResponse::from_project(project, online),
    }))
}

#[utoipa::path(
    put,
    path = "/projects/add-user",
    tag = "projects",
    request_body = AddUsersRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Updated project", body = ProjectEnvelope),
        (status = 403, description = "Caller is not a member"),
        (status = 404, description = "No such project"),
    )
)]
pub async fn add_users(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<AddUsersRequest>,
) -> Result<Json<ProjectEnvelope>, ServerError> {
    let id = parse_id(&req.project_id)?;
    let users: Vec<String> = req
        .users
        .into_iter()
        .map(|u| u.trim().to_owned())
        .filter(|u| !u.is_empty())
        .collect();
    if users.is_empty() {
        return Err(ServerError::BadRequest("users must not be empty".into()));
    }
    ensure_member(&find(&state, &id).await?, &user)?;

    let project = state
        .store
        .add_members(&id, &users)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("project {id} not found")))?;
    info!(project = %id, added = users.len(), "collaborators added");
    Ok(Json(ProjectEnvelope {
        project: ProjectResponse::from_project(project, 0),
    }))
}

/// Replace the project tree. Live rooms get a `file-tree` broadcast and
/// persist in the background; otherwise the store is written directly.
#[utoipa::path(
    put,
    path = "/projects/update-file-tree",
    tag = "projects",
    request_body = UpdateFileTreeRequest,
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Updated project", body = ProjectEnvelope),
        (status = 403, description = "Caller is not a member"),
        (status = 404, description = "No such project"),
    )
)]
pub async fn update_file_tree(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateFileTreeRequest>,
) -> Result<Json<ProjectEnvelope>, ServerError> {
    let id = parse_id(&req.project_id)?;
    let mut project = find(&state, &id).await?;
    ensure_member(&project, &user)?;

    // Held by the dispatcher (live or recently closed room): it persists.
    let held = state
        .dispatcher
        .replace_tree(id.clone(), req.file_tree.clone())
        .await?;
    if !held {
        state.store.persist_file_tree(&id, &req.file_tree).await?;
    }
    info!(project = %id, held, paths = req.file_tree.len(), "file tree replaced");

    project.file_tree = req.file_tree;
    Ok(Json(ProjectEnvelope {
        project: ProjectResponse::from_project(project, 0),
    }))
}

fn parse_id(raw: &str) -> Result<ProjectId, ServerError> {
    ProjectId::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

async fn find(state: &AppState, id: &ProjectId) -> Result<Project, ServerError> {
    state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("project {id} not found")))
}

fn ensure_member(project: &Project, user: &AuthUser) -> Result<(), ServerError> {
    if project.members.contains(user.user_id()) {
        Ok(())
    } else {
        Err(ServerError::Forbidden("not a member of this project".into()))
    }
}
