//! Domain models for agentkiln.
//!
//! - `AgentBuildSpec`: immutable input to a build
//! - `CompilationJob`: one tracked build attempt and its status machine
//! - `KilnError`: error taxonomy shared by the orchestrator and runtime

pub mod build_spec;
pub mod digest;
pub mod error;
pub mod job;

pub use build_spec::{
    AgentBuildSpec, BuildTarget, CredentialRequirement, ModelSelection, PromptDefinition,
    ResourceDefinition, ToolDefinition, ToolImplementation,
};
pub use error::{ErrorKind, KilnError, Result};
pub use job::{
    new_job_id, ArtifactLocator, BuildStrategy, CompilationJob, FailureKind, JobFailure,
    JobStatus,
};
