//! Remote CI provider seam and the run/artifact records it returns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CiError;

/// Inputs passed to the remote build workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchInputs {
    pub job_id: String,
    pub agent_name: String,
    /// The build spec as a JSON string.
    pub config: String,
    pub build_target: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HeadCommit {
    #[serde(default)]
    pub message: String,
}

/// One workflow run as listed by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_title: Option<String>,
    #[serde(default)]
    pub head_commit: Option<HeadCommit>,
    /// `queued`, `in_progress`, `completed`, ...
    #[serde(default)]
    pub status: Option<String>,
    /// Set once `status` is `completed`.
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl WorkflowRun {
    /// Whether the run carries `job_id` in its name, title or commit message.
    pub fn mentions(&self, job_id: &str) -> bool {
        self.name.as_deref().is_some_and(|n| n.contains(job_id))
            || self
                .display_title
                .as_deref()
                .is_some_and(|t| t.contains(job_id))
            || self
                .head_commit
                .as_ref()
                .is_some_and(|c| c.message.contains(job_id))
    }
}

/// Build artifact attached to a finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunArtifact {
    pub id: u64,
    pub name: String,
    #[serde(default, rename = "size_in_bytes")]
    pub size_bytes: Option<u64>,
    #[serde(default, rename = "archive_download_url")]
    pub download_url: String,
    #[serde(default)]
    pub expired: bool,
}

/// Metadata a finished run may publish to name its artifact explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentManifest {
    pub job_id: String,
    pub artifact_name: String,
}

/// A hosted CI service able to run agent builds.
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn dispatch(&self, inputs: &DispatchInputs) -> Result<(), CiError>;

    /// Recent runs of the build workflow, newest first.
    async fn list_runs(&self) -> Result<Vec<WorkflowRun>, CiError>;

    async fn list_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifact>, CiError>;

    /// Name of the step that failed in a failed run, if the provider can tell.
    async fn failed_step(&self, run_id: u64) -> Result<Option<String>, CiError>;

    /// Manifest published by the run. Providers that cannot read one
    /// return `None` and matching starts at the job-id tier.
    async fn deployment_manifest(
        &self,
        _run_id: u64,
        _artifacts: &[RunArtifact],
    ) -> Result<Option<DeploymentManifest>, CiError> {
        Ok(None)
    }
}
