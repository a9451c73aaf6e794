//! Runtime host for a compiled agent.
//!
//! Serves the agent's bound tools, its subagents and its model over a
//! loopback-only HTTP API.

pub mod api;
pub mod error;
pub mod server;

pub use api::{create_router, AgentSummary, AppState};
pub use error::{ApiError, RuntimeError, RuntimeResult};
pub use server::{parse_loopback, shutdown_signal, Runtime};
