use axum::routing::get;
use axum::Router;
use crate::state::AppState;

pub mod dto;
pub mod handler;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(handler::health))
}
