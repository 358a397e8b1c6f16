//! API route modules.
//!
//! Organized by resource, the way `rust-srec/src/api/routes/mod.rs` nests
//! each resource's router under a path prefix of the main router.

pub mod capacity;
pub mod hls;
pub mod intents;
pub mod sessions;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v3/intents", intents::router())
        .nest("/api/v3/sessions", sessions::router())
        .nest("/api/v3/system/capacity", capacity::router())
        .with_state(state)
}
