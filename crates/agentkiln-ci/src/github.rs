//! GitHub Actions as a [`CiProvider`].

use std::sync::Arc;

use agentkiln_core::RemoteCiConfig;
use async_trait::async_trait;
use credential_vault::{CredentialStore, ExposeSecret};
use reqwest::{header, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::error::CiError;
use crate::provider::{CiProvider, DeploymentManifest, DispatchInputs, RunArtifact, WorkflowRun};

const USER_AGENT: &str = concat!("agentkiln/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Deserialize)]
struct RunsPage {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct ArtifactsPage {
    #[serde(default)]
    artifacts: Vec<RunArtifact>,
}

#[derive(Debug, Deserialize)]
struct JobsPage {
    #[serde(default)]
    jobs: Vec<RunJob>,
}

#[derive(Debug, Deserialize)]
struct RunJob {
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    steps: Vec<RunStep>,
}

#[derive(Debug, Deserialize)]
struct RunStep {
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
}

/// Workflow-dispatch client for one repository.
///
/// The API token is looked up in the credential store on every request and
/// never cached here.
pub struct GithubActionsClient {
    config: RemoteCiConfig,
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
}

impl GithubActionsClient {
    pub fn new(config: RemoteCiConfig, credentials: Arc<CredentialStore>) -> Result<Self, CiError> {
        if !config.is_configured() {
            return Err(CiError::NotConfigured(
                "owner and repo must be set".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CiError::Request(e.to_string()))?;
        Ok(Self {
            config,
            credentials,
            http,
        })
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/actions/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path
        )
    }

    fn request(&self, method: Method, url: &str) -> Result<RequestBuilder, CiError> {
        let token = self.credentials.get(&self.config.token_credential)?;
        Ok(self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(token.expose_secret()))
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, CiError> {
        let response = builder
            .send()
            .await
            .map_err(|e| CiError::Request(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CiError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, CiError> {
        let response = self.send(self.request(Method::GET, url)?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| CiError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl CiProvider for GithubActionsClient {
    fn name(&self) -> &str {
        "github-actions"
    }

    async fn dispatch(&self, inputs: &DispatchInputs) -> Result<(), CiError> {
        let url = self.repo_url(&format!("workflows/{}/dispatches", self.config.workflow));
        let body = json!({
            "ref": self.config.git_ref,
            "inputs": inputs,
        });
        self.send(self.request(Method::POST, &url)?.json(&body))
            .await?;
        info!(
            job_id = %inputs.job_id,
            workflow = %self.config.workflow,
            "dispatched remote build"
        );
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>, CiError> {
        let url = self.repo_url(&format!(
            "workflows/{}/runs?event=workflow_dispatch&per_page=50",
            self.config.workflow
        ));
        let page: RunsPage = self.get_json(&url).await?;
        debug!(count = page.workflow_runs.len(), "listed workflow runs");
        Ok(page.workflow_runs)
    }

    async fn list_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifact>, CiError> {
        let url = self.repo_url(&format!("runs/{run_id}/artifacts"));
        let page: ArtifactsPage = self.get_json(&url).await?;
        Ok(page
            .artifacts
            .into_iter()
            .filter(|a| !a.expired)
            .collect())
    }

    async fn failed_step(&self, run_id: u64) -> Result<Option<String>, CiError> {
        let url = self.repo_url(&format!("runs/{run_id}/jobs"));
        let page: JobsPage = self.get_json(&url).await?;
        Ok(first_failed_step(&page.jobs))
    }

    /// Reads `job_id=<id> artifact=<name>` from the run's title, which the
    /// build workflow sets through its `run-name`.
    async fn deployment_manifest(
        &self,
        run_id: u64,
        _artifacts: &[RunArtifact],
    ) -> Result<Option<DeploymentManifest>, CiError> {
        let url = self.repo_url(&format!("runs/{run_id}"));
        let run: WorkflowRun = self.get_json(&url).await?;
        let manifest = [run.display_title.as_deref(), run.name.as_deref()]
            .into_iter()
            .flatten()
            .find_map(parse_run_manifest);
        debug!(run_id, found = manifest.is_some(), "read run manifest");
        Ok(manifest)
    }
}

/// `key=value` tokens of a run title; both keys are required.
fn parse_run_manifest(title: &str) -> Option<DeploymentManifest> {
    let mut job_id = None;
    let mut artifact_name = None;
    for token in title.split_whitespace() {
        match token.split_once('=') {
            Some(("job_id", v)) if !v.is_empty() => job_id = Some(v.to_string()),
            Some(("artifact", v)) if !v.is_empty() => artifact_name = Some(v.to_string()),
            _ => {}
        }
    }
    Some(DeploymentManifest {
        job_id: job_id?,
        artifact_name: artifact_name?,
    })
}

fn first_failed_step(jobs: &[RunJob]) -> Option<String> {
    let failed = |c: &Option<String>| c.as_deref() == Some("failure");
    let job = jobs.iter().find(|j| failed(&j.conclusion))?;
    match job.steps.iter().find(|s| failed(&s.conclusion)) {
        Some(step) => Some(format!("{} / {}", job.name, step.name)),
        None => Some(job.name.clone()),
    }
}
