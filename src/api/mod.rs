mod handlers;

pub use handlers::retry_on_conflict;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::service::FeatureManagementService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub management: FeatureManagementService,
    /// Attempts per request before a storage conflict is returned to the client.
    pub conflict_retries: u32,
}

impl AppState {
    pub fn new(management: FeatureManagementService, conflict_retries: u32) -> Self {
        Self {
            management,
            conflict_retries,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Catalog
        .route("/features", get(handlers::list_catalog))
        .route("/features/{name}", get(handlers::get_latest_feature))
        .route(
            "/features/{name}/versions/{version}",
            get(handlers::get_feature_version),
        )
        // Raw assignments
        .route("/subjects/{kind}/{id}/features", get(handlers::get_features))
        .route("/subjects/{kind}/{id}/features", post(handlers::add_feature))
        // Capabilities
        .route(
            "/subjects/{kind}/{id}/capabilities/{name}",
            get(handlers::has_capability)
                .put(handlers::add_capability)
                .delete(handlers::remove_capability),
        )
        .route(
            "/capabilities/{name}/subjects",
            get(handlers::list_capability_subjects),
        )
        .route("/users/{id}/early-access", get(handlers::can_early_access))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
