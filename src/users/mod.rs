use crate::state::AppState;
use axum::Router;

pub mod handlers;
#[cfg(test)]
pub mod memory;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod upload;


pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::user_routes())
        .merge(crate::auth::handlers::auth_routes())
}
