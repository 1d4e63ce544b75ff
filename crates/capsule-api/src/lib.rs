//! HTTP layer of the time capsule service.

pub mod auth;
pub mod capsules;
pub mod error;
pub mod gate;
pub mod middleware;
pub mod storage;
pub mod upload;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Full application router: public auth routes, token-protected capsule
/// routes, and the shared layers.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/auth/user", get(auth::current_user))
        .route("/capsules", get(capsules::list_capsules).post(capsules::create_capsule))
        .route("/capsules/{id}", get(capsules::get_capsule).delete(capsules::delete_capsule))
        .route("/capsules/{id}/files/{index}", get(capsules::download_file))
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(upload::MAX_BODY_SIZE))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health: liveness check (no auth).
pub async fn health() -> &'static str {
    "ok"
}
