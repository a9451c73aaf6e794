//! agentkiln core library
//!
//! Shared model for the build orchestrator and the agent runtime host:
//! build specs and compilation jobs, the error taxonomy, configuration,
//! progress notifications, tracing setup and the function registry that
//! binds an agent's tools.

pub mod config;
pub mod domain;
pub mod metrics;
pub mod notify;
pub mod obs;
pub mod telemetry;
pub mod tools;

pub use config::{
    KilnConfig, LocalBuildConfig, PollConfig, RemoteCiConfig, RetentionConfig, SubagentConfig,
};
pub use domain::{
    new_job_id, AgentBuildSpec, ArtifactLocator, BuildStrategy, BuildTarget, CompilationJob,
    CredentialRequirement, ErrorKind, FailureKind, JobFailure, JobStatus, KilnError,
    ModelSelection, PromptDefinition, ResourceDefinition, Result, ToolDefinition,
    ToolImplementation,
};
pub use notify::{BroadcastPublisher, ProgressEvent, ProgressPublisher};
pub use tools::{
    BuiltinCatalog, FunctionRegistry, ToolError, ToolExecutionConfig, ToolInfo, ToolReport,
};
