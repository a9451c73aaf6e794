//! Credential Vault: named secrets for agentkiln
//!
//! Resolves, holds and redacts the secrets every other agentkiln component
//! needs (CI tokens, LLM provider keys, values injected into subagents).
//!
//! ## Layer 0 - Secrets
//!
//! Focus: the store is the only owner of raw secret values. Callers look a
//! value up by name for the duration of one call and drop it afterwards.
//!
//! ## Key Components
//!
//! - `CredentialStore`: table of credentials, metadata-only persistence
//! - `Credential`: a named secret and its declared source
//! - `CredentialMetadata`: the value-free view used for listings and files
//! - `Prompter`: lazy resolution of prompt-sourced credentials

mod error;
mod resolve;
mod store;
mod types;

pub use error::{CredentialError, Result};
pub use resolve::{Prompter, StdinPrompter};
pub use store::CredentialStore;
pub use types::{Credential, CredentialKind, CredentialMetadata, CredentialSource};

pub use secrecy::{ExposeSecret, SecretString};
