//! HTTP surface — the provider webhook, health, and the internal notify API.

pub mod routes;

pub use routes::{AppState, app_router};
