use axum::{
    routing::{delete, get, post, put},
    Router,
};

use crate::state::AppState;

pub mod claims;
pub mod context;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod user_agent;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(handlers::register))
        .route("/auth/login", post(handlers::login))
        .route("/auth/refresh-token", post(handlers::refresh))
        .route(
            "/auth/request-password-reset",
            post(handlers::request_password_reset),
        )
        .route("/auth/reset-password", post(handlers::reset_password))
        .route("/auth/password", put(handlers::update_password))
        .route("/auth/me", get(handlers::me))
        .route("/auth/sessions", get(handlers::sessions))
        .route("/auth/sessions/:id", delete(handlers::revoke_session))
        .route("/auth/logout", post(handlers::logout))
}
