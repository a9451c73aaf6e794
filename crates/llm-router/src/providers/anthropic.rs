//! Anthropic Messages wire format.
//!
//! System messages are hoisted into the top-level `system` field; only user
//! and assistant turns go in `messages`.

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, InferenceResponse, Provider, Role, Sampling, TokenUsage};

pub(crate) const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Serialize)]
pub(crate) struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

pub(crate) fn url(base: &str) -> String {
    format!("{}/messages", base.trim_end_matches('/'))
}

pub(crate) fn build_request<'a>(
    model: &'a str,
    messages: &'a [ChatMessage],
    sampling: Sampling,
) -> MessagesRequest<'a> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    MessagesRequest {
        model,
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        messages: messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::System => return None,
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                Some(WireMessage {
                    role,
                    content: &m.content,
                })
            })
            .collect(),
        max_tokens: sampling.max_tokens,
        temperature: sampling.temperature,
        top_p: sampling.top_p,
    }
}

pub(crate) fn parse_response(model: &str, raw: &str) -> Result<InferenceResponse> {
    let response: MessagesResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse {
            provider: Provider::Anthropic,
            reason: format!("JSON parse error: {e}"),
        })?;

    let text: String = response
        .content
        .into_iter()
        .filter(|b| b.kind == "text")
        .filter_map(|b| b.text)
        .collect();

    let usage = response
        .usage
        .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
        .unwrap_or_default();

    Ok(InferenceResponse {
        text,
        finish_reason: response.stop_reason,
        usage,
        provider: Provider::Anthropic,
        model: model.to_string(),
    })
}
