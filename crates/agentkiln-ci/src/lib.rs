//! Compilation orchestrator for agentkiln.
//!
//! Turns a validated [`AgentBuildSpec`](agentkiln_core::AgentBuildSpec) into a
//! tracked [`CompilationJob`](agentkiln_core::CompilationJob). A job is built
//! locally when a toolchain is available and is otherwise dispatched to a
//! remote CI workflow, whose run is then polled and matched to an artifact.
//!
//! # Example
//!
//! ```ignore
//! let orchestrator = Arc::new(
//!     Orchestrator::new(Arc::new(BroadcastPublisher::default()))
//!         .with_local_builder(Arc::new(CargoLocalBuilder::new(config.local.clone())))
//!         .with_remote(Arc::new(GithubActionsClient::new(config.remote.clone(), store)?)),
//! );
//! let job_id = orchestrator.submit(spec).await?;
//! let outcome = JobPoller::from_config(&config.poll)
//!     .poll(&orchestrator, &job_id, cancel_rx)
//!     .await?;
//! ```

pub mod error;
pub mod github;
pub mod local;
pub mod matcher;
pub mod orchestrator;
pub mod poller;
pub mod provider;
pub mod stage;

pub use error::{CiError, LocalBuildError, PollError};
pub use github::GithubActionsClient;
pub use local::{scaffold, CargoLocalBuilder, LocalBuilder, ScaffoldedCrate};
pub use matcher::{match_artifact, ArtifactMatch, MatchTier};
pub use orchestrator::Orchestrator;
pub use poller::{JobPoller, PollOutcome};
pub use provider::{CiProvider, DeploymentManifest, DispatchInputs, RunArtifact, WorkflowRun};
pub use stage::{run_stage, BuildStage, StageResult};
