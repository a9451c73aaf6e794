//! agentkilnd: serve one agent's tools and model on a loopback port.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentkiln_core::{AgentBuildSpec, KilnConfig};
use agentkilnd::{parse_loopback, shutdown_signal, Runtime};
use anyhow::{Context, Result};
use clap::Parser;
use credential_vault::CredentialStore;
use tokio::net::TcpListener;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "agentkilnd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run an agent's tools, subagents and model behind a loopback API", long_about = None)]
struct Args {
    /// Agent build spec (JSON)
    #[arg(long)]
    spec: PathBuf,

    /// Listen address; must be loopback. Defaults to the configured runtime_addr
    #[arg(long, env = "AGENTKILN_RUNTIME_ADDR")]
    addr: Option<String>,

    /// JSON configuration file (AGENTKILN_* variables are used when absent)
    #[arg(long, env = "AGENTKILN_CONFIG")]
    config: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    agentkiln_core::telemetry::init_tracing(args.json, level);

    let config = match args.config.as_deref() {
        Some(path) => KilnConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => KilnConfig::from_env().context("Invalid AGENTKILN_* environment")?,
    };
    config.validate()?;

    let addr = parse_loopback(args.addr.as_deref().unwrap_or(&config.runtime_addr))?;
    let spec = read_spec(&args.spec)?;
    let store = match &config.credentials_path {
        Some(path) => CredentialStore::open(path)
            .with_context(|| format!("Failed to open credential store {:?}", path))?,
        None => CredentialStore::new(),
    };

    let runtime = Runtime::from_spec(&spec, &config, Arc::new(store))
        .context("Failed to prepare agent runtime")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(agent = %spec.name, version = %spec.version, "starting runtime host");

    runtime.serve(listener, shutdown_signal()).await?;
    Ok(())
}

fn read_spec(path: &Path) -> Result<AgentBuildSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read spec {:?}", path))?;
    Ok(AgentBuildSpec::from_json(&raw)?)
}
