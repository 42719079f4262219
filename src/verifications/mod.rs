use axum::{extract::DefaultBodyLimit, routing::get, Router};

use crate::state::AppState;

pub mod dto;
pub mod handlers;
pub mod recognition;
pub mod repo;
pub mod repo_types;
pub mod services;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/face-verifications",
            get(handlers::list)
                .post(handlers::create)
                .layer(DefaultBodyLimit::max(services::MAX_BODY_BYTES)),
        )
        .route(
            "/face-verifications/:id",
            get(handlers::get_one).delete(handlers::delete),
        )
}
