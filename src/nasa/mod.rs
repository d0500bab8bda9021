use crate::state::AppState;
use axum::Router;

pub mod client;
pub mod dto;
pub mod error;
pub mod handlers;

pub use client::NasaClient;

pub fn router() -> Router<AppState> {
    handlers::nasa_routes()
}
