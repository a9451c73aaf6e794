//! Shared state for the runtime host's handlers.

use std::sync::Arc;

use agentkiln_core::FunctionRegistry;
use chrono::{DateTime, Utc};
use llm_router::InferenceClient;
use serde::Serialize;
use subagent_manager::SubagentManager;

/// Identity of the agent being served.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentSummary {
    pub name: String,
    pub version: String,
    pub spec_digest: String,
}

#[derive(Clone)]
pub struct AppState {
    pub agent: AgentSummary,
    pub registry: Arc<FunctionRegistry>,
    pub subagents: Option<Arc<SubagentManager>>,
    /// Absent when the model could not be configured at startup.
    pub inference: Option<Arc<InferenceClient>>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(agent: AgentSummary, registry: Arc<FunctionRegistry>) -> Self {
        Self {
            agent,
            registry,
            subagents: None,
            inference: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_subagents(mut self, manager: Arc<SubagentManager>) -> Self {
        self.subagents = Some(manager);
        self
    }

    pub fn with_inference(mut self, client: Arc<InferenceClient>) -> Self {
        self.inference = Some(client);
        self
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
