//! Error types for credential-vault

use thiserror::Error;

/// Errors that can occur while resolving or storing credentials
#[derive(Error, Debug)]
pub enum CredentialError {
    /// Credential metadata failed validation
    #[error("invalid credential: {0}")]
    Invalid(String),

    /// A credential with the same name is already registered
    #[error("credential already exists: {0}")]
    Duplicate(String),

    /// No credential registered under this name
    #[error("credential not found: {0}")]
    NotFound(String),

    /// Credential is registered but its value has not been resolved
    #[error("credential '{0}' has no resolved value")]
    Unresolved(String),

    /// Declared source could not produce a value
    #[error("failed to resolve credential '{name}' from {source_kind}: {reason}")]
    ResolutionFailed {
        name: String,
        source_kind: String,
        reason: String,
    },

    /// One or more required credentials are missing a value
    #[error("missing required credentials: {}", .names.join(", "))]
    MissingRequired { names: Vec<String> },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for credential operations
pub type Result<T> = std::result::Result<T, CredentialError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_required_lists_every_name() {
        let err = CredentialError::MissingRequired {
            names: vec!["OPENAI_KEY".to_string(), "GH_TOKEN".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("OPENAI_KEY"));
        assert!(msg.contains("GH_TOKEN"));
    }
}
