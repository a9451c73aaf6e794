//! Runtime host errors and their HTTP mapping.

use agentkiln_core::{KilnError, ToolError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use llm_router::LlmError;
use serde::Serialize;
use subagent_manager::SubagentError;
use thiserror::Error;

/// Startup and lifecycle failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Kiln(#[from] KilnError),

    #[error(transparent)]
    Credential(#[from] credential_vault::CredentialError),

    #[error(transparent)]
    Subagent(#[from] SubagentError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Request-level errors returned as JSON.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Inference(#[from] LlmError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Tool(e) => match e {
                ToolError::UnknownTool { .. } => (StatusCode::NOT_FOUND, "UNKNOWN_TOOL"),
                ToolError::InputNotObject { .. } | ToolError::SchemaViolation { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_INPUT")
                }
                ToolError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "TOOL_TIMEOUT"),
                ToolError::CircuitOpen { .. } => {
                    (StatusCode::SERVICE_UNAVAILABLE, "CIRCUIT_OPEN")
                }
                ToolError::Subagent {
                    source: SubagentError::NotRunning(_),
                    ..
                } => (StatusCode::SERVICE_UNAVAILABLE, "SUBAGENT_NOT_RUNNING"),
                ToolError::Failed { .. } | ToolError::Subagent { .. } => {
                    (StatusCode::BAD_GATEWAY, "TOOL_FAILED")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::Inference(e) => match e {
                LlmError::InvalidConfig(_) | LlmError::Credential(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "INFERENCE_UNCONFIGURED")
                }
                _ => (StatusCode::BAD_GATEWAY, "INFERENCE_FAILED"),
            },
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
