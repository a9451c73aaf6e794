//! LLM Router: one inference shape over many providers
//!
//! Callers build an [`InferenceClient`] for a provider/model pair and send a
//! list of [`ChatMessage`]s; the router produces the provider's own request
//! body and auth, and maps the reply back to an [`InferenceResponse`].
//!
//! | provider  | auth                    | system messages              |
//! |-----------|-------------------------|------------------------------|
//! | openai    | bearer                  | inline                       |
//! | ollama    | bearer (optional)       | inline                       |
//! | anthropic | `x-api-key` header      | hoisted to `system`          |
//! | gemini    | `key` query parameter   | hoisted to `systemInstruction` |
//! | custom    | bearer (optional)       | inline, best-effort response |
//!
//! Non-success statuses surface as [`LlmError::ProviderApi`] with the raw
//! body. Nothing is retried here.

mod client;
mod error;
mod providers;
mod types;

pub use client::InferenceClient;
pub use error::{LlmError, Result};
pub use types::{
    ChatMessage, InferenceConfig, InferenceResponse, Provider, Role, Sampling, TokenUsage,
    DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS, DEFAULT_TOP_P,
};
