//! agentkiln CLI
//!
//! The `agentkiln` command builds agents from their specs and drives the
//! supporting services from a terminal.
//!
//! ## Commands
//!
//! - `validate`: check a build spec and print its digest
//! - `submit`: start a compilation job (local first, remote CI otherwise)
//! - `status` / `watch`: query or follow a job
//! - `credentials`: manage the credential store
//! - `infer`: one-shot LLM request through the inference router
//! - `tee exec`: run a command under a TEE policy

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentkiln_ci::{CargoLocalBuilder, GithubActionsClient, JobPoller, Orchestrator};
use agentkiln_core::metrics::METRICS;
use agentkiln_core::{
    AgentBuildSpec, BroadcastPublisher, BuildStrategy, CompilationJob, KilnConfig,
    ToolImplementation,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use credential_vault::{
    Credential, CredentialKind, CredentialSource, CredentialStore, Prompter, StdinPrompter,
};
use llm_router::{ChatMessage, InferenceClient, InferenceConfig, Provider};
use tee_sandbox::{run_isolated, TeePolicy};
use tokio::sync::watch;
use tracing::{info, warn, Level};

const DEFAULT_CREDENTIALS_FILE: &str = ".agentkiln/credentials.json";

#[derive(Parser)]
#[command(name = "agentkiln")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build AI agents into artifacts and run them sandboxed", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON log lines and JSON results
    #[arg(long, global = true)]
    json: bool,

    /// JSON configuration file (AGENTKILN_* variables are used when absent)
    #[arg(long, global = true, env = "AGENTKILN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a build spec and print its digest
    Validate {
        /// Path to the build spec (JSON)
        #[arg(short, long)]
        spec: PathBuf,
    },

    /// Submit a build spec for compilation
    Submit {
        /// Path to the build spec (JSON)
        #[arg(short, long)]
        spec: PathBuf,

        /// Poll until the job finishes
        #[arg(long)]
        wait: bool,
    },

    /// Show the status of a remote compilation job
    Status {
        /// Job id returned by `submit`
        job_id: String,

        /// Agent name, for display
        #[arg(long, default_value = "")]
        agent: String,
    },

    /// Follow a remote compilation job until it finishes
    Watch {
        job_id: String,

        #[arg(long, default_value = "")]
        agent: String,
    },

    /// Manage credentials
    Credentials {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Send one prompt through the inference router
    Infer {
        /// openai, anthropic, gemini, mistral, local or custom
        #[arg(long, default_value = "openai")]
        provider: Provider,

        #[arg(long)]
        model: String,

        /// Base URL override (full request URL for `custom`)
        #[arg(long)]
        endpoint: Option<String>,

        /// Credential holding the API key
        #[arg(long)]
        credential: Option<String>,

        #[arg(long)]
        system: Option<String>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,

        prompt: String,
    },

    /// Trusted execution environment operations
    Tee {
        #[command(subcommand)]
        action: TeeAction,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Register a credential and resolve it from its source
    Add {
        name: String,

        /// api_key, username, password, token, certificate or custom
        #[arg(short, long, default_value = "api_key")]
        kind: CredentialKind,

        /// env:VAR, file:PATH, keychain:SERVICE[:ACCOUNT], prompt or inline
        #[arg(short, long)]
        source: String,

        #[arg(long)]
        optional: bool,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// List credentials (values are never shown)
    List,

    /// Fail if any required credential has no value
    Check,

    /// Remove a credential
    Remove { name: String },
}

#[derive(Subcommand)]
enum TeeAction {
    /// Run a command inside an isolate
    Exec {
        /// TEE policy file (JSON); defaults apply when absent
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Wall-clock limit in seconds
        #[arg(long)]
        timeout: Option<i64>,

        /// Allow network access
        #[arg(long)]
        network: bool,

        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    agentkiln_core::telemetry::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;
    let result = run(cli.command, &config, cli.json).await;
    METRICS.flush();
    result
}

async fn run(command: Commands, config: &KilnConfig, json: bool) -> Result<()> {
    match command {
        Commands::Validate { spec } => cmd_validate(&spec, json),
        Commands::Submit { spec, wait } => cmd_submit(config, &spec, wait, json).await,
        Commands::Status { job_id, agent } => cmd_status(config, &job_id, &agent, json).await,
        Commands::Watch { job_id, agent } => cmd_watch(config, &job_id, &agent, json).await,
        Commands::Credentials { action } => {
            let store = open_store(config)?;
            match action {
                CredentialAction::Add {
                    name,
                    kind,
                    source,
                    optional,
                    description,
                } => cmd_credentials_add(
                    &store,
                    &name,
                    kind,
                    &source,
                    optional,
                    description,
                    &StdinPrompter,
                ),
                CredentialAction::List => cmd_credentials_list(&store, json),
                CredentialAction::Check => cmd_credentials_check(&store),
                CredentialAction::Remove { name } => {
                    store.remove(&name)?;
                    println!("Removed credential '{}'", name);
                    Ok(())
                }
            }
        }
        Commands::Infer {
            provider,
            model,
            endpoint,
            credential,
            system,
            temperature,
            max_tokens,
            prompt,
        } => {
            let mut inference = InferenceConfig::new(provider, model);
            inference.endpoint = endpoint;
            inference.api_key_credential = credential;
            inference.temperature = temperature;
            inference.max_tokens = max_tokens;
            cmd_infer(config, inference, system.as_deref(), &prompt, json).await
        }
        Commands::Tee { action } => match action {
            TeeAction::Exec {
                policy,
                timeout,
                network,
                command,
            } => cmd_tee_exec(policy.as_deref(), timeout, network, &command, json).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config(path: Option<&Path>) -> Result<KilnConfig> {
    let config = match path {
        Some(path) => KilnConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => KilnConfig::from_env().context("Invalid AGENTKILN_* environment")?,
    };
    config.validate()?;
    Ok(config)
}

fn open_store(config: &KilnConfig) -> Result<Arc<CredentialStore>> {
    let path = config
        .credentials_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_FILE));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {:?}", parent))?;
    }
    let store = CredentialStore::open(&path)
        .with_context(|| format!("Failed to open credential store {:?}", path))?;
    Ok(Arc::new(store))
}

/// Register `name` from the same-named environment variable when the store
/// does not know it yet.
fn adopt_env_credential(store: &CredentialStore, name: &str, kind: CredentialKind) -> Result<()> {
    if store.list().iter().any(|c| c.name == name) {
        return Ok(());
    }
    if std::env::var(name).map(|v| v.is_empty()).unwrap_or(true) {
        return Ok(());
    }
    store.add(Credential::from_env(name, kind, name))?;
    info!(credential = %name, "credential registered from environment");
    Ok(())
}

fn build_orchestrator(config: &KilnConfig, store: Arc<CredentialStore>) -> Result<Arc<Orchestrator>> {
    let publisher = Arc::new(BroadcastPublisher::default());
    build_orchestrator_with(config, store, publisher)
}

fn build_orchestrator_with(
    config: &KilnConfig,
    store: Arc<CredentialStore>,
    publisher: Arc<BroadcastPublisher>,
) -> Result<Arc<Orchestrator>> {
    let mut orchestrator = Orchestrator::new(publisher)
        .with_local_builder(Arc::new(CargoLocalBuilder::new(config.local.clone())))
        .with_retention(std::time::Duration::from_secs(
            config.retention.retention_secs,
        ));

    if config.remote.is_configured() {
        adopt_env_credential(&store, &config.remote.token_credential, CredentialKind::Token)?;
        let client = GithubActionsClient::new(config.remote.clone(), store)?;
        orchestrator = orchestrator.with_remote(Arc::new(client));
    } else {
        warn!("remote CI not configured; only local builds are possible");
    }
    Ok(Arc::new(orchestrator))
}

fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

// ---------------------------------------------------------------------------
// Build commands
// ---------------------------------------------------------------------------

fn read_spec(path: &Path) -> Result<AgentBuildSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec {:?}", path))?;
    let spec = AgentBuildSpec::from_json(&raw)?;
    spec.validate()?;
    Ok(spec)
}

fn cmd_validate(path: &Path, json: bool) -> Result<()> {
    let spec = read_spec(path)?;
    let digest = spec.digest()?;

    if json {
        let tools: Vec<&str> = spec.tools.iter().map(|t| t.name.as_str()).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "valid": true,
                "id": spec.id,
                "name": spec.sanitized_name(),
                "version": spec.version,
                "build_target": spec.build_target,
                "digest": digest,
                "tools": tools,
            }))?
        );
        return Ok(());
    }

    println!("Spec {} is valid", spec.id);
    println!("Agent:   {} {}", spec.sanitized_name(), spec.version);
    println!("Target:  {} ({})", spec.build_target, spec.build_target.platform());
    println!("Model:   {}/{}", spec.model.provider, spec.model.model);
    println!("Digest:  {}", digest);
    for tool in &spec.tools {
        let binding = match &tool.implementation {
            ToolImplementation::Builtin { function } => format!("builtin {function}"),
            ToolImplementation::Script { runtime, .. } => format!("{runtime} script"),
        };
        println!("  tool {:<20} {}", tool.name, binding);
    }
    Ok(())
}

async fn cmd_submit(config: &KilnConfig, path: &Path, wait: bool, json: bool) -> Result<()> {
    let spec = read_spec(path)?;
    let store = open_store(config)?;
    let orchestrator = build_orchestrator(config, store)?;

    let job_id = orchestrator.submit(spec).await?;
    let job = orchestrator.get_status(&job_id).await?;

    // A local build lives in this process, so it is always awaited.
    let job = if !job.is_terminal() && (wait || job.strategy == BuildStrategy::Local) {
        let poller = JobPoller::from_config(&config.poll);
        poller
            .poll(&orchestrator, &job_id, cancel_on_ctrl_c())
            .await?
            .job
    } else {
        job
    };

    print_job(&job, json)?;
    job.into_result()?;
    Ok(())
}

async fn cmd_status(config: &KilnConfig, job_id: &str, agent: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let orchestrator = build_orchestrator(config, store)?;
    orchestrator.track_remote(job_id, agent);

    let job = orchestrator.get_status(job_id).await?;
    print_job(&job, json)
}

async fn cmd_watch(config: &KilnConfig, job_id: &str, agent: &str, json: bool) -> Result<()> {
    let store = open_store(config)?;
    let publisher = Arc::new(BroadcastPublisher::default());
    let mut events = publisher.subscribe();
    let orchestrator = build_orchestrator_with(config, store, publisher)?;
    orchestrator.track_remote(job_id, agent);

    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            eprintln!("[{:>3}%] {}: {}", event.progress, event.step, event.message);
        }
    });

    let outcome = JobPoller::from_config(&config.poll)
        .poll(&orchestrator, job_id, cancel_on_ctrl_c())
        .await;
    printer.abort();

    let job = outcome?.job;
    print_job(&job, json)?;
    job.into_result()?;
    Ok(())
}

fn print_job(job: &CompilationJob, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(job)?);
        return Ok(());
    }

    println!("Job:       {}", job.job_id);
    if !job.agent_name.is_empty() {
        println!("Agent:     {}", job.agent_name);
    }
    println!("Strategy:  {:?}", job.strategy);
    println!("Status:    {} ({}%)", job.status, job.progress);
    if let Some(run_id) = job.remote_run_id {
        println!("Run:       {}", run_id);
    }
    if let Some(artifact) = &job.artifact {
        println!("Artifact:  {} -> {}", artifact.name, artifact.download_url);
    }
    if let Some(error) = &job.error {
        println!("Error:     {}", error);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

fn parse_source(raw: &str) -> Result<CredentialSource> {
    let (scheme, rest) = raw.split_once(':').unwrap_or((raw, ""));
    let source = match (scheme, rest) {
        ("env", var) if !var.is_empty() => CredentialSource::Env {
            var: var.to_string(),
        },
        ("file", path) if !path.is_empty() => CredentialSource::File {
            path: PathBuf::from(path),
        },
        ("keychain", entry) if !entry.is_empty() => {
            let (service, account) = match entry.split_once(':') {
                Some((service, account)) => (service, Some(account.to_string())),
                None => (entry, None),
            };
            CredentialSource::Keychain {
                service: service.to_string(),
                account,
            }
        }
        ("prompt", "") => CredentialSource::Prompt,
        ("inline", "") => CredentialSource::Inline,
        _ => bail!(
            "Invalid source '{}': expected env:VAR, file:PATH, keychain:SERVICE[:ACCOUNT], prompt or inline",
            raw
        ),
    };
    Ok(source)
}

fn cmd_credentials_add(
    store: &CredentialStore,
    name: &str,
    kind: CredentialKind,
    source: &str,
    optional: bool,
    description: Option<String>,
    prompter: &dyn Prompter,
) -> Result<()> {
    let source = parse_source(source)?;
    let mut credential = match source {
        CredentialSource::Inline => {
            let value = prompter.prompt(name, description.as_deref())?;
            warn!(credential = %name, "inline values are not persisted and must be re-entered");
            Credential::inline(name, kind, value)
        }
        other => Credential::new(name, kind, other),
    };
    if optional {
        credential = credential.optional();
    }
    if let Some(description) = description {
        credential = credential.with_description(description);
    }

    let meta = store.add(credential)?;
    println!(
        "Added credential '{}' ({}, {})",
        meta.name,
        meta.source.label(),
        if meta.resolved { "resolved" } else { "unresolved" }
    );
    Ok(())
}

fn kind_label(kind: CredentialKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn cmd_credentials_list(store: &CredentialStore, json: bool) -> Result<()> {
    let credentials = store.list();
    if json {
        println!("{}", serde_json::to_string_pretty(&credentials)?);
        return Ok(());
    }
    if credentials.is_empty() {
        println!("No credentials registered.");
        return Ok(());
    }
    for c in credentials {
        println!(
            "{:<24} {:<12} {:<9} {}{}",
            c.name,
            kind_label(c.kind),
            c.source.label(),
            if c.resolved { "resolved" } else { "missing" },
            if c.optional { " (optional)" } else { "" }
        );
    }
    Ok(())
}

fn cmd_credentials_check(store: &CredentialStore) -> Result<()> {
    store.validate_all()?;
    let required = store.list().iter().filter(|c| !c.optional).count();
    println!("All {} required credentials are resolved.", required);
    Ok(())
}

// ---------------------------------------------------------------------------
// Inference and TEE
// ---------------------------------------------------------------------------

async fn cmd_infer(
    config: &KilnConfig,
    inference: InferenceConfig,
    system: Option<&str>,
    prompt: &str,
    json: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let key_name = inference
        .api_key_credential
        .clone()
        .or_else(|| inference.provider.default_credential().map(str::to_string));
    if let Some(name) = &key_name {
        adopt_env_credential(&store, name, CredentialKind::ApiKey)?;
    }

    let client = InferenceClient::new(inference, store)?;
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let response = client.generate(&messages).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", response.text);
        info!(
            provider = %response.provider,
            model = %response.model,
            total_tokens = response.usage.total_tokens,
            "inference finished"
        );
    }
    Ok(())
}

fn load_policy(path: Option<&Path>) -> Result<TeePolicy> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read policy {:?}", path))?;
            serde_json::from_str(&raw).with_context(|| format!("Invalid policy {:?}", path))
        }
        None => Ok(TeePolicy::default()),
    }
}

async fn cmd_tee_exec(
    policy_path: Option<&Path>,
    timeout: Option<i64>,
    network: bool,
    command: &[String],
    json: bool,
) -> Result<()> {
    let Some((program, args)) = command.split_first() else {
        bail!("No command given");
    };
    let mut policy = load_policy(policy_path)?;
    if let Some(secs) = timeout {
        policy = policy.with_timeout_secs(secs);
    }
    if network {
        policy.capabilities.network_access = true;
    }
    policy.validate()?;

    let output = run_isolated(policy, program, args).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }
    if !output.success() {
        bail!("Command exited with {}", output.exit_code);
    }
    Ok(())
}
