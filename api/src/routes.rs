use axum::{
    routing::{get, patch, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Create the main application router with all routes and middleware
#[tracing::instrument(skip(state))]
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::metrics::metrics_handler));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        // Schedule lifecycle
        .route("/schedule/init", post(handlers::schedule::init_schedule))
        .route("/schedule/list", get(handlers::schedule::list_schedules))
        .route("/schedule/grid/:id", get(handlers::schedule::get_grid))
        .route(
            "/schedule/internal-courses/auto/:id",
            get(handlers::schedule::auto_populate),
        )
        .route("/schedule/generate/:id", post(handlers::schedule::generate))
        .route("/schedule/share/:id", post(handlers::schedule::share))
        .route("/schedule/approve/:id", post(handlers::schedule::approve))
        .route("/schedule/finalize/:id", post(handlers::schedule::finalize))
        .route("/schedule/archive/:id", post(handlers::schedule::archive))
        // Slot editing
        .route("/schedule/slots", post(handlers::slots::add_slot))
        .route("/schedule/slots/import", post(handlers::slots::import_slots))
        .route(
            "/schedule/slots/:id",
            patch(handlers::slots::update_slot).delete(handlers::slots::remove_slot),
        )
        // History
        .route("/history", get(handlers::history::list_history))
        .route("/history/:id", get(handlers::history::get_history))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Combine all routes
    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
