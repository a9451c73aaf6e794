//! Remote build flow: dispatch, status mapping, artifact resolution and polling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentkiln_ci::{
    CiError, CiProvider, DispatchInputs, GithubActionsClient, JobPoller, LocalBuildError,
    LocalBuilder, Orchestrator, PollError, RunArtifact, WorkflowRun,
};
use agentkiln_core::{
    AgentBuildSpec, ArtifactLocator, BroadcastPublisher, BuildStrategy, BuildTarget,
    FailureKind, JobStatus, KilnError, RemoteCiConfig, ToolDefinition,
};
use async_trait::async_trait;
use credential_vault::{Credential, CredentialKind, CredentialStore};
use llm_router::{InferenceConfig, Provider};
use serde_json::json;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RUNS: &str = "/repos/acme/agents/actions/workflows/build-agent.yml/runs";
const DISPATCH: &str = "/repos/acme/agents/actions/workflows/build-agent.yml/dispatches";

struct NeverLocal;

#[async_trait]
impl LocalBuilder for NeverLocal {
    async fn probe(&self) -> Result<(), LocalBuildError> {
        Err(LocalBuildError::Unavailable("forced for test".to_string()))
    }

    async fn build(
        &self,
        _job_id: &str,
        _spec: &AgentBuildSpec,
    ) -> Result<ArtifactLocator, LocalBuildError> {
        Err(LocalBuildError::Unavailable("forced for test".to_string()))
    }
}

fn spec() -> AgentBuildSpec {
    AgentBuildSpec::new(
        "spec-7",
        "Support Agent",
        "2.0.0",
        InferenceConfig::new(Provider::Anthropic, "claude-sonnet"),
    )
    .with_tool(ToolDefinition::builtin("now", "timestamp"))
    .with_build_target(BuildTarget::NativePlugin)
}

fn github(server: &MockServer) -> Arc<GithubActionsClient> {
    let store = CredentialStore::new();
    store
        .add(Credential::inline(
            "GITHUB_TOKEN",
            CredentialKind::Token,
            "ghp_test",
        ))
        .expect("add token");
    let config = RemoteCiConfig {
        api_base: server.uri(),
        owner: "acme".to_string(),
        repo: "agents".to_string(),
        ..RemoteCiConfig::default()
    };
    Arc::new(GithubActionsClient::new(config, Arc::new(store)).expect("client"))
}

fn orchestrator(remote: Arc<dyn CiProvider>) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::new(Arc::new(BroadcastPublisher::default()))
            .with_local_builder(Arc::new(NeverLocal))
            .with_remote(remote),
    )
}

fn run(id: u64, job_id: &str, status: &str, conclusion: Option<&str>) -> serde_json::Value {
    json!({
        "id": id,
        "name": "build-agent",
        "display_title": format!("Build agent {job_id}"),
        "status": status,
        "conclusion": conclusion,
        "html_url": format!("https://github.test/acme/agents/actions/runs/{id}")
    })
}

async fn mount_dispatch(server: &MockServer, status: u16, body: &str) {
    Mock::given(method("POST"))
        .and(path(DISPATCH))
        .and(header("authorization", "Bearer ghp_test"))
        .and(header("accept", "application/vnd.github+json"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

// -------------------------------------------------------------------------
// GitHub Actions end to end
// -------------------------------------------------------------------------

#[tokio::test]
async fn remote_fallback_builds_and_resolves_artifact() {
    let server = MockServer::start().await;
    mount_dispatch(&server, 204, "").await;

    let orch = orchestrator(github(&server));
    let job_id = orch.submit(spec()).await.expect("submit");

    let pending = orch.get_status(&job_id).await;
    // No runs endpoint yet: the fetch fails and the job is left alone.
    assert!(matches!(pending, Err(KilnError::StatusFetch(_))));

    Mock::given(method("GET"))
        .and(path(RUNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow_runs": [
                run(41, "compile-someone-else", "completed", Some("success")),
                run(42, &job_id, "in_progress", None),
            ]
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RUNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow_runs": [run(42, &job_id, "completed", Some("success"))]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/agents/actions/runs/42/artifacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "artifacts": [
                {"id": 1, "name": "build-logs", "size_in_bytes": 10,
                 "archive_download_url": "https://github.test/a/1.zip", "expired": false},
                {"id": 2, "name": format!("plugin-{job_id}"), "size_in_bytes": 2048,
                 "archive_download_url": "https://github.test/a/2.zip", "expired": false}
            ]
        })))
        .mount(&server)
        .await;

    let (_tx, rx) = watch::channel(false);
    let outcome = JobPoller::new(Duration::from_millis(10), 20)
        .poll(&orch, &job_id, rx)
        .await
        .expect("poll");

    assert_eq!(
        outcome.observed,
        vec![JobStatus::InProgress, JobStatus::Completed]
    );
    let job = outcome.job;
    assert_eq!(job.strategy, BuildStrategy::Remote);
    assert_eq!(job.remote_run_id, Some(42));
    let artifact = job.artifact.expect("artifact");
    assert_eq!(artifact.name, format!("plugin-{job_id}"));
    assert_eq!(artifact.size_bytes, Some(2048));
    assert!(job
        .logs
        .iter()
        .any(|l| l.contains("local build unavailable")));

    let requests = server.received_requests().await.expect("recorded");
    let dispatch = requests
        .iter()
        .find(|r| r.url.path() == DISPATCH)
        .expect("dispatch request");
    let body: serde_json::Value = serde_json::from_slice(&dispatch.body).expect("json body");
    assert_eq!(body["ref"], "main");
    assert_eq!(body["inputs"]["job_id"], job_id.as_str());
    assert_eq!(body["inputs"]["agent_name"], "support-agent");
    assert_eq!(body["inputs"]["build_target"], "native-plugin");
    let config: AgentBuildSpec =
        AgentBuildSpec::from_json(body["inputs"]["config"].as_str().expect("config string"))
            .expect("config parses");
    assert_eq!(config.id, "spec-7");
}

#[tokio::test]
async fn bytecode_build_resolves_manifest_artifact() {
    let server = MockServer::start().await;
    mount_dispatch(&server, 204, "").await;

    let orch = orchestrator(github(&server));
    let bytecode = spec().with_build_target(BuildTarget::SandboxedBytecode);
    let job_id = orch.submit(bytecode).await.expect("submit");

    let title = format!("agentkiln build job_id={job_id} artifact=support-agent-wasm");
    let mut completed = run(77, &job_id, "completed", Some("success"));
    completed["display_title"] = json!(title);
    Mock::given(method("GET"))
        .and(path(RUNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow_runs": [completed.clone()]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/agents/actions/runs/77"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completed))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/agents/actions/runs/77/artifacts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "artifacts": [
                {"id": 5, "name": "support-agent-wasm", "size_in_bytes": 512,
                 "archive_download_url": "https://github.test/a/5.zip", "expired": false},
                {"id": 6, "name": "build-logs", "size_in_bytes": 10,
                 "archive_download_url": "https://github.test/a/6.zip", "expired": false}
            ]
        })))
        .mount(&server)
        .await;

    let (_tx, rx) = watch::channel(false);
    let outcome = JobPoller::new(Duration::from_millis(10), 20)
        .poll(&orch, &job_id, rx)
        .await
        .expect("poll");

    let job = outcome.job;
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.remote_run_id, Some(77));
    let artifact = job.artifact.expect("artifact");
    assert_eq!(artifact.name, "support-agent-wasm");
    assert!(job.logs.iter().any(|l| l.contains("manifest match")));

    let requests = server.received_requests().await.expect("recorded");
    let dispatch = requests
        .iter()
        .find(|r| r.url.path() == DISPATCH)
        .expect("dispatch request");
    let body: serde_json::Value = serde_json::from_slice(&dispatch.body).expect("json body");
    assert_eq!(body["inputs"]["build_target"], "sandboxed-bytecode");
}

#[tokio::test]
async fn dispatch_rejection_fails_job_with_raw_body() {
    let server = MockServer::start().await;
    mount_dispatch(&server, 422, r#"{"message":"Unexpected inputs provided: [\"platform\"]"}"#)
        .await;

    let orch = orchestrator(github(&server));
    let job_id = orch.submit(spec()).await.expect("submit");

    let job = orch.get_status(&job_id).await.expect("status");
    assert_eq!(job.status, JobStatus::Failed);
    let failure = job.error.expect("failure");
    assert_eq!(failure.kind, FailureKind::Dispatch);
    assert!(failure
        .raw_body
        .expect("raw body")
        .contains("Unexpected inputs"));
}

#[tokio::test]
async fn failed_run_reports_failed_step() {
    let server = MockServer::start().await;
    mount_dispatch(&server, 204, "").await;
    let orch = orchestrator(github(&server));
    let job_id = orch.submit(spec()).await.expect("submit");

    Mock::given(method("GET"))
        .and(path(RUNS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflow_runs": [run(77, &job_id, "completed", Some("failure"))]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/acme/agents/actions/runs/77/jobs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jobs": [{"name": "build", "conclusion": "failure", "steps": [
                {"name": "cargo build", "conclusion": "failure"}
            ]}]
        })))
        .mount(&server)
        .await;

    let job = orch.get_status(&job_id).await.expect("status");
    assert_eq!(job.status, JobStatus::Failed);
    let failure = job.error.expect("failure");
    assert_eq!(failure.kind, FailureKind::Build);
    assert_eq!(failure.failed_step.as_deref(), Some("build / cargo build"));

    // Terminal jobs are not refetched.
    let again = orch.get_status(&job_id).await.expect("status");
    assert_eq!(again.finished_at, job.finished_at);
}

#[tokio::test]
async fn missing_token_fails_dispatch() {
    let server = MockServer::start().await;
    let config = RemoteCiConfig {
        api_base: server.uri(),
        owner: "acme".to_string(),
        repo: "agents".to_string(),
        ..RemoteCiConfig::default()
    };
    let client = GithubActionsClient::new(config, Arc::new(CredentialStore::new())).expect("client");
    let orch = orchestrator(Arc::new(client));

    let job_id = orch.submit(spec()).await.expect("submit");
    let job = orch.get_status(&job_id).await.expect("status");
    assert_eq!(job.error.expect("failure").kind, FailureKind::Dispatch);
    assert!(server
        .received_requests()
        .await
        .expect("recorded")
        .is_empty());
}

// -------------------------------------------------------------------------
// Polling against a scripted provider
// -------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Step {
    Run(&'static str, Option<&'static str>),
    Error,
}

/// Replays `steps` for the dispatched job, repeating the last one forever.
struct ScriptedProvider {
    steps: Mutex<VecDeque<Step>>,
    dispatched: Mutex<Option<String>>,
}

impl ScriptedProvider {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            dispatched: Mutex::new(None),
        })
    }
}

#[async_trait]
impl CiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn dispatch(&self, inputs: &DispatchInputs) -> Result<(), CiError> {
        *self.dispatched.lock().unwrap() = Some(inputs.job_id.clone());
        Ok(())
    }

    async fn list_runs(&self) -> Result<Vec<WorkflowRun>, CiError> {
        let step = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().copied()
            }
        };
        let job_id = self.dispatched.lock().unwrap().clone().unwrap_or_default();
        match step {
            Some(Step::Run(status, conclusion)) => Ok(vec![WorkflowRun {
                id: 9,
                display_title: Some(format!("Build agent {job_id}")),
                status: Some(status.to_string()),
                conclusion: conclusion.map(str::to_string),
                ..WorkflowRun::default()
            }]),
            Some(Step::Error) | None => Err(CiError::Request("connection reset".to_string())),
        }
    }

    async fn list_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifact>, CiError> {
        Ok(vec![RunArtifact {
            id: run_id,
            name: "agent-plugin.zip".to_string(),
            size_bytes: None,
            download_url: "https://ci.test/agent-plugin.zip".to_string(),
            expired: false,
        }])
    }

    async fn failed_step(&self, _run_id: u64) -> Result<Option<String>, CiError> {
        Ok(None)
    }
}

#[tokio::test(start_paused = true)]
async fn poll_gives_up_after_max_attempts() {
    let orch = orchestrator(ScriptedProvider::new(vec![Step::Run("queued", None)]));
    let job_id = orch.submit(spec()).await.expect("submit");

    let (_tx, rx) = watch::channel(false);
    let err = JobPoller::default()
        .poll(&orch, &job_id, rx)
        .await
        .unwrap_err();
    match err {
        PollError::TimedOut {
            attempts,
            last_status,
            ..
        } => {
            assert_eq!(attempts, 60);
            assert_eq!(last_status, Some(JobStatus::Queued));
        }
        other => panic!("expected TimedOut, got {:?}", other),
    }

    let job = orch.get_status(&job_id).await.expect("status");
    assert_eq!(job.error.expect("failure").kind, FailureKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn transient_fetch_errors_are_retried_and_counted() {
    let orch = orchestrator(ScriptedProvider::new(vec![
        Step::Error,
        Step::Error,
        Step::Run("completed", Some("success")),
    ]));
    let job_id = orch.submit(spec()).await.expect("submit");

    let (_tx, rx) = watch::channel(false);
    let outcome = JobPoller::default()
        .poll(&orch, &job_id, rx)
        .await
        .expect("poll");
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.observed, vec![JobStatus::Completed]);
    assert_eq!(
        outcome.job.artifact.expect("artifact").name,
        "agent-plugin.zip"
    );

    let (_tx, rx) = watch::channel(false);
    let exhausted = JobPoller::new(Duration::from_secs(5), 2);
    let orch = orchestrator(ScriptedProvider::new(vec![Step::Error]));
    let job_id = orch.submit(spec()).await.expect("submit");
    assert!(matches!(
        exhausted.poll(&orch, &job_id, rx).await,
        Err(PollError::TimedOut { attempts: 2, last_status: None, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn caller_can_cancel_polling() {
    let orch = orchestrator(ScriptedProvider::new(vec![Step::Run("in_progress", None)]));
    let job_id = orch.submit(spec()).await.expect("submit");

    let (tx, rx) = watch::channel(false);
    let task = {
        let orch = Arc::clone(&orch);
        let job_id = job_id.clone();
        tokio::spawn(async move { JobPoller::default().poll(&orch, &job_id, rx).await })
    };
    tokio::time::sleep(Duration::from_secs(12)).await;
    tx.send(true).expect("send");

    let result = task.await.expect("join");
    assert!(matches!(result, Err(PollError::Cancelled { .. })));

    let job = orch.get_status(&job_id).await.expect("status");
    assert_eq!(job.status, JobStatus::InProgress);
}

#[tokio::test]
async fn provider_cannot_move_job_backwards() {
    let orch = orchestrator(ScriptedProvider::new(vec![
        Step::Run("in_progress", None),
        Step::Run("queued", None),
    ]));
    let job_id = orch.submit(spec()).await.expect("submit");

    assert_eq!(
        orch.get_status(&job_id).await.expect("first").status,
        JobStatus::InProgress
    );
    let job = orch.get_status(&job_id).await.expect("second");
    assert_eq!(job.status, JobStatus::InProgress);
    assert_eq!(job.progress, 50);
}
