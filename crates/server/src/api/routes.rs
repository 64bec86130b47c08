use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{handlers, tasks};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and capabilities
        .route("/health", get(handlers::health))
        .route("/formats", get(handlers::list_formats))
        // Tasks
        .route("/tasks", post(tasks::create_task))
        .route("/tasks", get(tasks::list_tasks))
        .route("/tasks/{id}", get(tasks::get_task))
        .route("/tasks/{id}", delete(tasks::cancel_task))
        .route("/tasks/{id}/retry", post(tasks::retry_task))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics).with_state(state))
        .layer(TraceLayer::new_for_http())
}
