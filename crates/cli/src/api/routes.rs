use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use tower_http::services::ServeDir;

use super::{albums, handlers, middleware::metrics_middleware};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let output_dir = state.output_dir().to_path_buf();

    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Albums
        .route("/albums", get(albums::list_albums))
        .route("/albums/{id}", get(albums::get_album));

    // Album directories (index.html, remote.html, images/)
    let galleries = ServeDir::new(output_dir).append_index_html_on_directories(true);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .fallback_service(galleries)
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state)
}
