use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

use crate::routes::{health, projects, users};

#[derive(OpenApi)]
#[openapi(info(
    title = "devroom-server",
    description = "devroom collaboration API",
    version = "0.1.0",
    contact(name = "devroom", url = "https://github.com/devroom/devroom")
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(projects::ProjectsApi::openapi());
    root.merge(users::UsersApi::openapi());
    if let Some(components) = root.components.as_mut() {
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).bearer_format("JWT").build()),
        );
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = get_docs();
        for path in [
            "/health",
            "/projects/create",
            "/projects/all",
            "/projects/get-project/{id}",
            "/projects/add-user",
            "/projects/update-file-tree",
            "/users/profile",
            "/users/logout",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = doc.components.map(|c| c.security_schemes).unwrap_or_default();
        assert!(schemes.contains_key("bearer"));
    }
}
