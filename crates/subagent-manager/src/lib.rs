//! Subagent Manager: child agents under TEE governance
//!
//! A parent agent delegates tool calls to subagents: small Python or Node
//! programs, each running inside its own [`tee_sandbox::Isolate`]. The
//! manager owns the live set and enforces its capacity.
//!
//! Lifecycle is `create -> start (initialize, then launch) -> run_tool* ->
//! stop -> delete`. Status is derived from `is_running` and `last_error`
//! on every query.

mod descriptor;
mod error;
mod manager;
mod subagent;

pub use descriptor::{ModelOverride, SubagentDescriptor, SubagentRuntime, SubagentTool};
pub use error::{Result, SubagentError};
pub use manager::{
    ManagerUsage, SubagentManager, SubagentManagerConfig, ToolContext, DEFAULT_MAX_CONCURRENT,
};
pub use subagent::{Subagent, SubagentInfo, SubagentStatus};
