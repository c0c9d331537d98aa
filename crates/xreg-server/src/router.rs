use axum::routing::{any, get};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handler;
use crate::state::SharedState;

/// Build the axum router with all registry endpoints.
///
/// `/model`, `/capabilities` and `/export` are matched before the entity
/// catch-all, so those names cannot be used as Group types.
pub fn build_router(state: SharedState) -> Router {
    let cors = state.config.cors;
    let router = Router::new()
        .route("/model", get(handler::get_model).put(handler::put_model))
        .route(
            "/capabilities",
            get(handler::get_capabilities).put(handler::put_capabilities),
        )
        .route("/export", get(handler::export_handler))
        .route("/", any(handler::entity_handler))
        .route("/*path", any(handler::entity_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);
    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
