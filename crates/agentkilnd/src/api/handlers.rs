//! Request handlers.

use agentkiln_core::{ToolInfo, ToolReport};
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use llm_router::{ChatMessage, InferenceResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use subagent_manager::{ManagerUsage, SubagentInfo, ToolContext};
use tee_sandbox::{cancel_pair, CancelHandle};
use tracing::{debug, info};

use super::state::{AgentSummary, AppState};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub agent: AgentSummary,
    pub uptime_secs: i64,
    pub tools: usize,
    pub subagents_running: usize,
    pub inference: bool,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let subagents_running = state
        .subagents
        .as_ref()
        .map(|m| m.usage().running)
        .unwrap_or(0);
    Json(HealthResponse {
        status: "healthy".to_string(),
        agent: state.agent.clone(),
        uptime_secs: state.uptime_secs(),
        tools: state.registry.list().len(),
        subagents_running,
        inference: state.inference.is_some(),
    })
}

pub async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolInfo>> {
    Json(state.registry.list())
}

/// Cancels the tool call if the request future is dropped mid-flight.
struct CancelOnDrop(CancelHandle);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// `POST /tools/:name` with a JSON object body (empty body means `{}`).
pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<ToolReport>> {
    let input: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?
    };

    let (handle, token) = cancel_pair();
    let _guard = CancelOnDrop(handle);
    let ctx = ToolContext {
        cancel: token,
        caller: Some("http".to_string()),
    };

    debug!(tool = %name, "tool call received");
    let report = state.registry.invoke(&ctx, &name, &input).await?;
    info!(tool = %name, duration_ms = report.duration_ms, "tool call finished");
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct SubagentsResponse {
    pub subagents: Vec<SubagentInfo>,
    pub usage: ManagerUsage,
}

pub async fn list_subagents(State(state): State<AppState>) -> Json<SubagentsResponse> {
    let (subagents, usage) = match &state.subagents {
        Some(manager) => (manager.list(), manager.usage()),
        None => (Vec::new(), ManagerUsage::default()),
    };
    Json(SubagentsResponse { subagents, usage })
}

#[derive(Debug, Deserialize)]
pub struct InferenceRequest {
    pub messages: Vec<ChatMessage>,
}

pub async fn infer(
    State(state): State<AppState>,
    Json(request): Json<InferenceRequest>,
) -> ApiResult<Json<InferenceResponse>> {
    let client = state
        .inference
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("no inference client configured".to_string()))?;
    if request.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".to_string()));
    }
    let response = client.generate(&request.messages).await?;
    Ok(Json(response))
}
