//! Last-resort path for unlisted providers.
//!
//! The request is OpenAI-shaped. The response is scanned for a string in
//! `text`, `response` or `content`, in that order; nothing else about the
//! envelope is assumed.

use serde_json::Value;

use crate::error::{LlmError, Result};
use crate::types::{InferenceResponse, Provider, TokenUsage};

const TEXT_FIELDS: [&str; 3] = ["text", "response", "content"];

pub(crate) fn parse_response(model: &str, raw: &str) -> Result<InferenceResponse> {
    let value: Value = serde_json::from_str(raw).map_err(|e| LlmError::InvalidResponse {
        provider: Provider::Custom,
        reason: format!("JSON parse error: {e}"),
    })?;

    let text = TEXT_FIELDS
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .ok_or_else(|| LlmError::InvalidResponse {
            provider: Provider::Custom,
            reason: format!("none of {TEXT_FIELDS:?} found in response"),
        })?;

    let finish_reason = ["finish_reason", "stop_reason", "done_reason"]
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .map(str::to_string);

    Ok(InferenceResponse {
        text: text.to_string(),
        finish_reason,
        usage: TokenUsage::default(),
        provider: Provider::Custom,
        model: model.to_string(),
    })
}
