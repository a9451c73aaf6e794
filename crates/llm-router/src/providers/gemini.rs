//! Gemini `generateContent` wire format.
//!
//! The key travels in the URL query string, system text goes to
//! `systemInstruction`, and the assistant role is called `model`.

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, InferenceResponse, Provider, Role, Sampling, TokenUsage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<OwnedPart>,
}

#[derive(Debug, Serialize)]
struct OwnedPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: Option<u32>,
}

/// Request URL without the key; the client appends `key` as a query pair.
pub(crate) fn url(base: &str, model: &str) -> String {
    format!(
        "{}/models/{}:generateContent",
        base.trim_end_matches('/'),
        model
    )
}

pub(crate) fn build_request<'a>(
    messages: &'a [ChatMessage],
    sampling: Sampling,
) -> GenerateContentRequest<'a> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();

    GenerateContentRequest {
        contents: messages
            .iter()
            .filter_map(|m| {
                let role = match m.role {
                    Role::System => return None,
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                Some(Content {
                    role,
                    parts: vec![Part { text: &m.content }],
                })
            })
            .collect(),
        system_instruction: (!system.is_empty()).then(|| SystemInstruction {
            parts: vec![OwnedPart {
                text: system.join("\n\n"),
            }],
        }),
        generation_config: GenerationConfig {
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            max_output_tokens: sampling.max_tokens,
        },
    }
}

pub(crate) fn parse_response(model: &str, raw: &str) -> Result<InferenceResponse> {
    let response: GenerateContentResponse =
        serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse {
            provider: Provider::Gemini,
            reason: format!("JSON parse error: {e}"),
        })?;

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: Provider::Gemini,
            reason: "no candidates in response".to_string(),
        })?;

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let usage = response
        .usage_metadata
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u
                .total_token_count
                .unwrap_or(u.prompt_token_count + u.candidates_token_count),
        })
        .unwrap_or_default();

    Ok(InferenceResponse {
        text,
        finish_reason: candidate.finish_reason,
        usage,
        provider: Provider::Gemini,
        model: model.to_string(),
    })
}
