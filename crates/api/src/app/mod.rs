//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store wiring and multi-store request flows
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response bodies
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use jobrelay_infra::ApiKeyEntry;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>, api_keys: &[ApiKeyEntry]) -> Router {
    let auth_state = middleware::AuthState::new(api_keys);

    // Protected routes: require a known API key.
    let protected = routes::router()
        .layer(ServiceBuilder::new().layer(Extension(services)))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
}
