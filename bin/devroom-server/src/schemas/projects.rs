use devroom_types::{FileTree, Project};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    /// Unique project name; stored lowercased and trimmed.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFileTreeRequest {
    pub project_id: String,
    /// Path → `{ "file": { "contents": "..." } }` map.
    #[schema(value_type = Object)]
    pub file_tree: FileTree,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AddUsersRequest {
    pub project_id: String,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub users: Vec<String>,
    #[schema(value_type = Object)]
    pub file_tree: FileTree,
    /// Connections currently in the project's room.
    pub online: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectEnvelope {
    pub project: ProjectResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProjectList {
    pub projects: Vec<ProjectResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl ProjectResponse {
    pub fn from_project(project: Project, online: usize) -> Self {
        Self {
            id: project.id.to_string(),
            name: project.name,
            users: project.members.into_iter().collect(),
            file_tree: project.file_tree,
            online,
        }
    }
}
