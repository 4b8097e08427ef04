pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::curve::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/api/v1/curve", get(handlers::handle_get_curve))
        .route(
            "/api/v1/keywords/volume",
            post(handlers::handle_keyword_volume),
        )
        .with_state(state)
}
