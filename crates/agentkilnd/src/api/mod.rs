//! Loopback HTTP surface of the runtime host.

pub mod handlers;
pub mod state;

use axum::{
    routing::{get, post},
    Router,
};

pub use state::{AgentSummary, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/tools", get(handlers::list_tools))
        .route("/tools/:name", post(handlers::invoke_tool))
        .route("/subagents", get(handlers::list_subagents))
        .route("/inference", post(handlers::infer))
        .with_state(state)
}
