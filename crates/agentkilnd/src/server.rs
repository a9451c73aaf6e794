//! Runtime assembly and server lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use agentkiln_core::metrics::METRICS;
use agentkiln_core::{
    AgentBuildSpec, BuiltinCatalog, FunctionRegistry, KilnConfig, ToolExecutionConfig,
};
use axum::Router;
use credential_vault::{CredentialError, CredentialStore};
use llm_router::InferenceClient;
use subagent_manager::SubagentManager;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::{create_router, AgentSummary, AppState};
use crate::error::{RuntimeError, RuntimeResult};

/// One agent's tools, subagents and model, ready to serve.
pub struct Runtime {
    state: AppState,
    manager: Arc<SubagentManager>,
}

impl Runtime {
    /// Bind everything `spec` declares against `credentials`.
    ///
    /// The build spec's credential requirements are registered first and checked
    /// together, so a missing required secret fails startup with every
    /// missing name at once.
    pub fn from_spec(
        spec: &AgentBuildSpec,
        config: &KilnConfig,
        credentials: Arc<CredentialStore>,
    ) -> RuntimeResult<Self> {
        spec.validate()?;
        register_spec_credentials(&credentials, spec)?;
        credentials.validate_all()?;

        let manager = Arc::new(SubagentManager::new(
            config.subagents.manager_config(spec.tee_policy.clone()),
            Arc::clone(&credentials),
        ));
        let registry = FunctionRegistry::from_spec(
            spec,
            BuiltinCatalog::standard(),
            Arc::clone(&manager),
            ToolExecutionConfig::default(),
        )?;

        let agent = AgentSummary {
            name: spec.sanitized_name(),
            version: spec.version.clone(),
            spec_digest: spec.digest()?,
        };
        let mut state = AppState::new(agent, Arc::new(registry)).with_subagents(Arc::clone(&manager));
        match InferenceClient::new(spec.model.clone(), credentials) {
            Ok(client) => state = state.with_inference(Arc::new(client)),
            Err(e) => warn!(error = %e, "inference disabled"),
        }

        Ok(Self { state, manager })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Start every subagent the registry created.
    pub async fn start(&self) -> RuntimeResult<()> {
        self.state.registry.start_subagents().await?;
        Ok(())
    }

    /// Serve on `listener` until `shutdown` resolves, then stop subagents.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        ensure_loopback(addr)?;
        self.start().await?;

        info!(
            %addr,
            agent = %self.state.agent.name,
            tools = self.state.registry.list().len(),
            "runtime host listening"
        );
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        info!("runtime host shutting down");
        if let Err(e) = self.manager.shutdown().await {
            warn!(error = %e, "subagent shutdown incomplete");
        }
        METRICS.flush();
        served?;
        Ok(())
    }
}

/// Parse `raw` and refuse anything but a loopback address.
pub fn parse_loopback(raw: &str) -> RuntimeResult<SocketAddr> {
    let addr: SocketAddr = raw
        .parse()
        .map_err(|e| RuntimeError::Config(format!("invalid runtime address {raw:?}: {e}")))?;
    ensure_loopback(addr)?;
    Ok(addr)
}

fn ensure_loopback(addr: SocketAddr) -> RuntimeResult<()> {
    if addr.ip().is_loopback() {
        Ok(())
    } else {
        Err(RuntimeError::Config(format!(
            "runtime host must bind a loopback address, got {addr}"
        )))
    }
}

fn register_spec_credentials(store: &CredentialStore, spec: &AgentBuildSpec) -> RuntimeResult<()> {
    for requirement in &spec.credentials {
        match store.add(requirement.to_credential()) {
            Ok(_) | Err(CredentialError::Duplicate(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, shutting down"),
        _ = terminate => info!("received terminate signal, shutting down"),
    }
}
