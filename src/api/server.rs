use std::path::Path;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::api::handlers::{generate_from_body, generate_from_query, health};
use crate::app_state::AppState;

pub fn create_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    let generate = get(generate_from_query).post(generate_from_body);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/generate/", generate.clone())
        .route("/api/generate", generate)
        .route_service("/", ServeFile::new(static_dir.join("index.html")))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
