//! Error types for llm-router

use thiserror::Error;

use crate::types::Provider;

/// Errors that can occur while routing an inference request
#[derive(Error, Debug)]
pub enum LlmError {
    /// Client configuration is incomplete or inconsistent
    #[error("invalid inference config: {0}")]
    InvalidConfig(String),

    /// The API key could not be looked up
    #[error("credential error: {0}")]
    Credential(#[from] credential_vault::CredentialError),

    /// Transport failure before a response arrived
    #[error("{provider} request failed: {reason}")]
    Request { provider: Provider, reason: String },

    /// Provider answered with a non-success status; body kept verbatim
    #[error("{provider} API error (HTTP {status}): {body}")]
    ProviderApi {
        provider: Provider,
        status: u16,
        body: String,
    },

    /// Provider answered 2xx but the envelope could not be mapped
    #[error("invalid {provider} response: {reason}")]
    InvalidResponse { provider: Provider, reason: String },
}

/// Result type for inference operations
pub type Result<T> = std::result::Result<T, LlmError>;
