use axum::{routing::get, Router};

pub mod agents;
pub mod blueprints;
pub mod system;
pub mod tasks;

/// Router for all authenticated (owner-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/agents", agents::router())
        .nest("/tasks", tasks::router())
        .nest("/blueprints", blueprints::router())
}
