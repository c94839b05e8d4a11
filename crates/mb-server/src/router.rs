//! Axum router construction.
//!
//! Builds the application router with all routes and middleware layers.

use axum::middleware;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::middleware::request_id::request_id_middleware;
use crate::routes;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let video_routes = Router::new()
        .route("/metadata", get(routes::video::metadata))
        .route("/fallback", get(routes::video::fallback))
        .route("/segment", get(routes::video::segment));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/video", video_routes)
        .route("/file/get", get(routes::file::get_file))
        .route("/admin/tools", get(routes::admin::tools))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
